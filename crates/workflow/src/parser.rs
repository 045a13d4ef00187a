//! Workflow file parser and serializer.
//!
//! The format is markdown with a YAML frontmatter block: `## Phase:`
//! headings open phases, `###` headings switch between the Steps,
//! Completion Criteria, and Branches sections. The parser is tolerant
//! (unknown sections are ignored and blank lines do nothing), but a
//! missing or invalid frontmatter refuses the whole file.

use serde::Deserialize;

use px_domain::error::{Error, Result};

use crate::definition::{
    BranchDef, CompletionCriteria, CompletionKind, Phase, Step, Workflow,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frontmatter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct Frontmatter {
    name: String,
    #[serde(default)]
    description: String,
    /// Informational; the authoritative phase order is the body's
    /// `## Phase:` headings.
    #[serde(default)]
    #[allow(dead_code)]
    phases: Vec<String>,
}

/// Split the document into (frontmatter, body). The frontmatter block
/// is delimited by two lines each containing only `---`.
fn split_frontmatter(input: &str) -> Result<(&str, &str)> {
    let rest = input
        .strip_prefix("---")
        .ok_or_else(|| Error::Workflow("missing frontmatter delimiter".into()))?;
    let rest = rest
        .strip_prefix('\n')
        .or_else(|| rest.strip_prefix("\r\n"))
        .ok_or_else(|| Error::Workflow("missing frontmatter delimiter".into()))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let front = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Ok((front, body));
        }
        offset += line.len();
    }
    Err(Error::Workflow("unterminated frontmatter block".into()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Body grammar
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    Steps,
    Completion,
    Branches,
    Unknown,
}

/// Parse a workflow document.
pub fn parse_workflow(input: &str) -> Result<Workflow> {
    let (front_raw, body) = split_frontmatter(input)?;
    let front: Frontmatter = serde_yaml::from_str(front_raw)
        .map_err(|e| Error::Workflow(format!("invalid frontmatter: {e}")))?;

    let mut phases: Vec<Phase> = Vec::new();
    let mut section = Section::Unknown;
    // Completion text accumulates line by line; joined on phase close.
    let mut completion_lines: Vec<String> = Vec::new();

    let close_phase = |phases: &mut Vec<Phase>, lines: &mut Vec<String>| {
        if let Some(phase) = phases.last_mut() {
            if !lines.is_empty() {
                let description = lines.join(" ");
                phase.completion = CompletionCriteria {
                    kind: infer_completion_kind(&description),
                    description,
                };
                lines.clear();
            }
        }
    };

    for raw_line in body.lines() {
        let line = raw_line.trim();

        if let Some(name) = line.strip_prefix("## Phase:") {
            close_phase(&mut phases, &mut completion_lines);
            phases.push(Phase {
                name: name.trim().to_string(),
                steps: Vec::new(),
                completion: CompletionCriteria::default(),
                branches: Vec::new(),
            });
            section = Section::Unknown;
            continue;
        }

        if let Some(heading) = line.strip_prefix("###") {
            let heading = heading.trim().to_lowercase();
            section = if heading.starts_with("steps") {
                Section::Steps
            } else if heading.starts_with("completion") {
                // "Completion" alone is an accepted alias for
                // "Completion Criteria".
                Section::Completion
            } else if heading.starts_with("branch") {
                Section::Branches
            } else {
                Section::Unknown
            };
            continue;
        }

        if line.is_empty() {
            continue;
        }

        let Some(phase) = phases.last_mut() else {
            continue;
        };

        match section {
            Section::Steps => {
                if let Some(item) = list_item(line) {
                    phase.steps.push(parse_step(item));
                }
            }
            Section::Completion => {
                completion_lines.push(line.to_string());
            }
            Section::Branches => {
                if let Some(item) = list_item(line) {
                    phase.branches.push(parse_branch(item));
                }
            }
            Section::Unknown => {}
        }
    }
    close_phase(&mut phases, &mut completion_lines);

    Ok(Workflow {
        name: front.name,
        description: front.description,
        phases,
    })
}

fn list_item(line: &str) -> Option<&str> {
    line.strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .map(str::trim)
}

/// `id: name (required)`. The marker toggles the flag regardless of
/// case; a missing id is derived from the name.
fn parse_step(item: &str) -> Step {
    let lowered = item.to_lowercase();
    let required = lowered.contains("(required)");
    let text = if required {
        let idx = lowered.find("(required)").unwrap_or(item.len());
        let mut stripped = String::with_capacity(item.len());
        stripped.push_str(&item[..idx]);
        stripped.push_str(&item[(idx + "(required)".len()).min(item.len())..]);
        stripped.trim().to_string()
    } else {
        item.to_string()
    };

    match text.split_once(':') {
        Some((id, name)) => Step {
            id: id.trim().to_string(),
            name: name.trim().to_string(),
            description: String::new(),
            required,
        },
        None => Step {
            id: text.to_lowercase().replace(' ', "_"),
            name: text,
            description: String::new(),
            required,
        },
    }
}

/// `condition → description`, `condition: description`, or the whole
/// text as both.
fn parse_branch(item: &str) -> BranchDef {
    let (condition, description) = if let Some((c, d)) = item.split_once('→') {
        (c.trim(), d.trim())
    } else if let Some((c, d)) = item.split_once(':') {
        (c.trim(), d.trim())
    } else {
        (item, item)
    };
    BranchDef {
        condition: condition.to_string(),
        description: description.to_string(),
        target_phase: None,
        steps: Vec::new(),
    }
}

fn infer_completion_kind(description: &str) -> CompletionKind {
    let lowered = description.to_lowercase();
    if lowered.contains("all required") {
        CompletionKind::AllRequired
    } else if lowered.contains("branch") {
        CompletionKind::AnyBranch
    } else {
        CompletionKind::Custom
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Serializer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Render a workflow back into the file grammar. `parse_workflow`
/// applied to the output reproduces the workflow for data the grammar
/// can express.
pub fn serialize_workflow(workflow: &Workflow) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();
    out.push_str("---\n");
    let _ = writeln!(out, "name: {}", workflow.name);
    if !workflow.description.is_empty() {
        let _ = writeln!(out, "description: {}", workflow.description);
    }
    if !workflow.phases.is_empty() {
        out.push_str("phases:\n");
        for phase in &workflow.phases {
            let _ = writeln!(out, "  - {}", phase.name);
        }
    }
    out.push_str("---\n");

    for phase in &workflow.phases {
        let _ = writeln!(out, "\n## Phase: {}", phase.name);

        if !phase.steps.is_empty() {
            out.push_str("\n### Steps\n");
            for step in &phase.steps {
                let marker = if step.required { " (required)" } else { "" };
                let _ = writeln!(out, "- {}: {}{}", step.id, step.name, marker);
            }
        }

        if !phase.completion.description.is_empty() {
            out.push_str("\n### Completion Criteria\n");
            let _ = writeln!(out, "{}", phase.completion.description);
        }

        if !phase.branches.is_empty() {
            out.push_str("\n### Branches\n");
            for branch in &phase.branches {
                let _ = writeln!(out, "- {} → {}", branch.condition, branch.description);
            }
        }
    }

    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lookup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolve a workflow name to a file under the workspace. Candidates
/// are probed in order; the first existing file wins.
pub fn find_workflow(workspace: &std::path::Path, name: &str) -> Option<std::path::PathBuf> {
    let candidates = [
        workspace.join("workflows").join(format!("{name}.md")),
        workspace.join("workflows").join(name),
        workspace.join(format!("{name}.md")),
        workspace.join(name),
    ];
    candidates.into_iter().find(|p| p.is_file())
}

/// Find, read, and parse a workflow by name. A parser error refuses
/// the workflow.
pub fn load_workflow(workspace: &std::path::Path, name: &str) -> Result<Workflow> {
    let path = find_workflow(workspace, name)
        .ok_or_else(|| Error::Workflow(format!("workflow '{name}' not found")))?;
    let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
    parse_workflow(&raw)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
