use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Directories holding the crate's own Rust sources.
const SOURCE_DIRS: [&str; 8] = [
    "src", "cli", "copula", "margins", "simulate", "estimate", "tests", "benches",
];

const FORBIDDEN_COMMENT_WORDS: &str = "FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE";

// One source-hygiene policy, enforced line by line.
#[derive(Clone, Copy)]
enum Rule {
    UnderscoreBinding,
    ForbiddenCommentWord,
    StarsInComment,
    UppercaseComment,
    AllowDeadCode,
}

impl Rule {
    const ALL: [Rule; 5] = [
        Rule::UnderscoreBinding,
        Rule::ForbiddenCommentWord,
        Rule::StarsInComment,
        Rule::UppercaseComment,
        Rule::AllowDeadCode,
    ];

    fn pattern(self) -> String {
        match self {
            Rule::UnderscoreBinding => r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            Rule::ForbiddenCommentWord => format!(r"(//|/\*).*(?:{FORBIDDEN_COMMENT_WORDS})"),
            Rule::StarsInComment => r"(//|/\*).*\*\*".to_string(),
            Rule::UppercaseComment => r"(//|/\*).*".to_string(),
            Rule::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Rule::UnderscoreBinding => "underscore-prefixed variables",
            Rule::ForbiddenCommentWord => "comments with change-log words",
            Rule::StarsInComment => "'**' in non-doc comments",
            Rule::UppercaseComment => "comments with only uppercase letters",
            Rule::AllowDeadCode => "#[allow(dead_code)] attributes",
        }
    }

    fn remedy(self) -> &'static str {
        match self {
            Rule::UnderscoreBinding => {
                "Either use the variable (removing the underscore) or remove it completely."
            }
            Rule::ForbiddenCommentWord => {
                "Comments describe the code as it is, not how it got there. Remove them."
            }
            Rule::StarsInComment => "Use '**' only inside doc comments.",
            Rule::UppercaseComment => "Strongly consider deleting the comment completely.",
            Rule::AllowDeadCode => "Either use the code or remove it completely.",
        }
    }

    // Filters out matches the regex alone cannot rule out.
    fn is_violation(self, line: &str) -> bool {
        let trimmed = line.trim_start();
        match self {
            Rule::UnderscoreBinding => !is_comment(trimmed) && !is_inside_string(line),
            Rule::StarsInComment => !is_doc_comment(trimmed),
            Rule::UppercaseComment => comment_text(trimmed).is_some_and(|text| {
                let mut letters = text.chars().filter(|c| c.is_alphabetic()).peekable();
                letters.peek().is_some() && letters.all(char::is_uppercase)
            }),
            Rule::ForbiddenCommentWord | Rule::AllowDeadCode => true,
        }
    }
}

fn is_comment(trimmed: &str) -> bool {
    trimmed.starts_with("//") || trimmed.starts_with("/*")
}

fn is_doc_comment(trimmed: &str) -> bool {
    trimmed.starts_with("///") || trimmed.starts_with("//!")
}

// True when an underscore appears between a pair of double quotes.
fn is_inside_string(line: &str) -> bool {
    line.split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 1 && part.contains('_'))
}

fn comment_text(trimmed: &str) -> Option<&str> {
    if let Some(rest) = trimmed
        .strip_prefix("///")
        .or_else(|| trimmed.strip_prefix("//!"))
        .or_else(|| trimmed.strip_prefix("//"))
    {
        return Some(rest.trim());
    }
    let start = trimmed.find("/*")? + 2;
    let rest = &trimmed[start..];
    Some(rest.find("*/").map_or(rest, |end| &rest[..end]).trim())
}

// Collects every offending line of one file for one rule.
struct PolicyCollector {
    rule: Rule,
    file_path: PathBuf,
    violations: Vec<String>,
}

impl PolicyCollector {
    fn new(rule: Rule, file_path: &Path) -> Self {
        Self {
            rule,
            file_path: file_path.to_path_buf(),
            violations: Vec::new(),
        }
    }

    fn check_and_get_error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            self.rule.describe(),
            self.file_path.display()
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!(
            "\n⚠️ These are not allowed in this project.\n   {}\n",
            self.rule.remedy()
        ));
        Some(error_msg)
    }
}

impl Sink for PolicyCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.rule.is_violation(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn rust_sources() -> Vec<PathBuf> {
    SOURCE_DIRS
        .iter()
        .filter(|dir| Path::new(dir).is_dir())
        .flat_map(|dir| {
            println!("cargo:rerun-if-changed={dir}");
            WalkDir::new(dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
                .map(|e| e.into_path())
        })
        .collect()
}

fn scan(rule: Rule, sources: &[PathBuf]) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(&rule.pattern())?;
    let mut searcher = Searcher::new();
    for path in sources {
        let mut collector = PolicyCollector::new(rule, path);
        searcher.search_path(&matcher, path, &mut collector)?;
        if let Some(error_message) = collector.check_and_get_error_message() {
            return Err(error_message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let sources = rust_sources();
    for rule in Rule::ALL {
        if let Err(e) = scan(rule, &sources) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
