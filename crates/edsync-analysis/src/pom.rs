//! Maven POM reconciler.
//!
//! Reports XML syntax errors at the position the parser gives up, and a
//! small set of structural problems for well-formed documents.

use edsync_core::path::file_name;
use edsync_core::protocol::Problem;
use edsync_core::{Analysis, Analyzer, AnalyzerScope, ReconcileChannel, Result, SyncError};
use tracing::debug;

pub const POM_FILE_NAME: &str = "pom.xml";

#[derive(Debug, Default, Clone, Copy)]
pub struct PomAnalyzer;

impl Analyzer for PomAnalyzer {
    fn name(&self) -> &'static str {
        "pom"
    }

    fn applies_to(&self, path: &str) -> bool {
        file_name(path) == POM_FILE_NAME
    }

    fn scope(&self) -> AnalyzerScope {
        AnalyzerScope::File
    }

    fn channel(&self) -> ReconcileChannel {
        ReconcileChannel::Pom
    }

    fn reconcile(&self, path: &str, content: &str) -> Result<Analysis> {
        if content.trim().is_empty() {
            return Err(SyncError::ServerFailure(format!(
                "couldn't reconcile pom file '{path}' because its content is empty"
            )));
        }
        let problems = match roxmltree::Document::parse(content) {
            Ok(document) => structure_problems(content, document.root_element()),
            Err(err) => {
                debug!("{path} is not well-formed: {err}");
                let pos = err.pos();
                vec![syntax_problem(content, err.to_string(), pos.row as usize, pos.col as usize)]
            }
        };
        Ok(Analysis {
            problems,
            highlighted_positions: Vec::new(),
        })
    }
}

fn syntax_problem(content: &str, message: String, row: usize, col: usize) -> Problem {
    let start = line_offset(content, row) + col.saturating_sub(1);
    Problem::error(message, start, start + 1).with_line(row)
}

/// Char offset of the first char of 1-based line `row`.
fn line_offset(content: &str, row: usize) -> usize {
    if row <= 1 {
        return 0;
    }
    let mut line = 1;
    for (offset, ch) in content.chars().enumerate() {
        if ch == '\n' {
            line += 1;
            if line == row {
                return offset + 1;
            }
        }
    }
    content.chars().count()
}

fn is_element_named(node: roxmltree::Node<'_, '_>, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

fn child_text<'a>(node: roxmltree::Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.children()
        .find(|child| is_element_named(*child, name))
        .and_then(|child| child.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

fn structure_problems(content: &str, root: roxmltree::Node<'_, '_>) -> Vec<Problem> {
    let tag = root.tag_name().name();
    let start = content[..root.range().start].chars().count() + 1;
    let end = start + tag.chars().count();
    let line = content[..root.range().start].matches('\n').count() + 1;
    let problem = |message: String| Problem::error(message, start, end).with_line(line);

    if tag != "project" {
        return vec![problem(format!(
            "root element must be 'project', found '{tag}'"
        ))];
    }

    let has_parent = root.children().any(|child| is_element_named(child, "parent"));
    let mut required = vec!["modelVersion", "artifactId"];
    if !has_parent {
        required.extend(["groupId", "version"]);
    }
    required
        .into_iter()
        .filter(|name| child_text(root, name).is_none())
        .map(|name| problem(format!("'{name}' is missing.")))
        .collect()
}
