use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::Path;
use walkdir::WalkDir;

const SOURCE_ROOTS: [&str; 4] = ["glm", "cli", "tests", "benches"];

/// A source pattern that fails the build wherever it matches.
struct Rule {
    name: &'static str,
    pattern: &'static str,
    hint: &'static str,
    /// Matched lines for which this returns true are not violations.
    exempt: fn(&str) -> bool,
}

const RULES: [Rule; 3] = [
    Rule {
        name: "underscore-prefixed identifier",
        pattern: r"\b(_[a-zA-Z0-9_]+)\b",
        hint: "Use the binding or remove it; do not silence it with a leading underscore.",
        exempt: outside_code,
    },
    Rule {
        name: "#[allow(dead_code)] attribute",
        pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        hint: "Call the item or delete it.",
        exempt: never,
    },
    Rule {
        name: "change-log comment",
        pattern: r"(//|/\*).*\b(?:FIXED|FIXES|FIX|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFY|UPDATED|UPDATE|CORRECTED)\b",
        hint: "Comments describe the code as it is, not how it got there.",
        exempt: never,
    },
];

fn never(_: &str) -> bool {
    false
}

/// Comment lines and matches inside string literals.
fn outside_code(line: &str) -> bool {
    let trimmed = line.trim_start();
    if trimmed.starts_with("//") || trimmed.starts_with("/*") || trimmed.starts_with('*') {
        return true;
    }
    line.split('"').skip(1).step_by(2).any(|quoted| quoted.contains('_'))
}

struct Violations<'r> {
    rule: &'r Rule,
    lines: Vec<String>,
}

impl Sink for Violations<'_> {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if !(self.rule.exempt)(text) {
            let line = mat.line_number().unwrap_or(0);
            self.lines.push(format!("{line}:{text}"));
        }
        Ok(true)
    }
}

fn rust_sources() -> impl Iterator<Item = walkdir::DirEntry> {
    SOURCE_ROOTS
        .iter()
        .flat_map(|root| WalkDir::new(root).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
}

fn check(rule: &Rule, files: &[walkdir::DirEntry]) -> Result<Vec<String>, Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(rule.pattern)?;
    let mut searcher = Searcher::new();
    let mut report = Vec::new();
    for entry in files {
        let path: &Path = entry.path();
        let mut violations = Violations {
            rule,
            lines: Vec::new(),
        };
        searcher.search_path(&matcher, path, &mut violations)?;
        report.extend(
            violations
                .lines
                .into_iter()
                .map(|line| format!("  {}:{line}", path.display())),
        );
    }
    Ok(report)
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for root in SOURCE_ROOTS {
        println!("cargo:rerun-if-changed={root}");
    }

    let files: Vec<_> = rust_sources().collect();
    let mut failed = false;
    for rule in &RULES {
        match check(rule, &files) {
            Ok(report) if report.is_empty() => {}
            Ok(report) => {
                failed = true;
                eprintln!("error: {} found {} time(s):", rule.name, report.len());
                for line in report {
                    eprintln!("{line}");
                }
                eprintln!("  {}", rule.hint);
            }
            Err(e) => {
                failed = true;
                eprintln!("error: could not scan sources for {}: {e}", rule.name);
            }
        }
    }
    if failed {
        std::process::exit(1);
    }
}
