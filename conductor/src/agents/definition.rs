//! Markdown agent-definition loader (§6.1): a structured front-matter
//! header plus a free-form instruction body, one document per agent.
//!
//! Grounded on a skill-definition loader that walks a directory, parses a
//! `---`-delimited front-matter block per file, and accumulates one error
//! per malformed document rather than aborting the whole directory scan.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::domain::Phase;

const FRONT_MATTER_DELIMITER: &str = "---";

#[derive(Debug, Clone, Deserialize)]
struct AgentFrontMatter {
    name: String,
    display_name: Option<String>,
    model: Option<String>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
    #[serde(default)]
    capabilities: Vec<String>,
    category: Option<String>,
    phase: Option<String>,
    #[serde(default)]
    tools: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub name: String,
    pub display_name: String,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub capabilities: Vec<String>,
    pub category: Option<String>,
    pub phase: Option<Phase>,
    pub tools: Vec<String>,
    pub tags: Vec<String>,
    pub instructions: String,
    pub source_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AgentLoadError {
    pub path: PathBuf,
    pub message: String,
}

impl fmt::Display for AgentLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AgentLoadOutcome {
    pub agents: Vec<AgentDefinition>,
    pub errors: Vec<AgentLoadError>,
}

/// Loads every `*.md` file directly under `dir` as an agent definition.
/// A malformed file is recorded in `errors` and does not stop the scan.
pub fn load_agent_definitions(dir: &Path) -> AgentLoadOutcome {
    let mut outcome = AgentLoadOutcome::default();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            outcome.errors.push(AgentLoadError {
                path: dir.to_path_buf(),
                message: err.to_string(),
            });
            return outcome;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("md") {
            continue;
        }
        match load_one(&path) {
            Ok(definition) => outcome.agents.push(definition),
            Err(message) => outcome.errors.push(AgentLoadError { path, message }),
        }
    }

    outcome
}

fn load_one(path: &Path) -> Result<AgentDefinition, String> {
    let raw = std::fs::read_to_string(path).map_err(|err| err.to_string())?;
    let (front_matter, body) = split_front_matter(&raw)?;
    let parsed: AgentFrontMatter = serde_yaml::from_str(front_matter).map_err(|err| format!("invalid front matter: {err}"))?;

    if parsed.name.trim().is_empty() {
        return Err("agent name must not be empty".to_string());
    }

    let phase = parsed.phase.as_deref().map(parse_phase).transpose()?;

    Ok(AgentDefinition {
        display_name: parsed.display_name.clone().unwrap_or_else(|| parsed.name.clone()),
        name: parsed.name,
        model: parsed.model,
        temperature: parsed.temperature,
        max_tokens: parsed.max_tokens,
        capabilities: parsed.capabilities,
        category: parsed.category,
        phase,
        tools: parsed.tools,
        tags: parsed.tags,
        instructions: body.trim().to_string(),
        source_path: path.to_path_buf(),
    })
}

fn parse_phase(raw: &str) -> Result<Phase, String> {
    match raw.to_lowercase().as_str() {
        "research" => Ok(Phase::Research),
        "design" => Ok(Phase::Design),
        "implement" => Ok(Phase::Implement),
        "test" => Ok(Phase::Test),
        "validate" => Ok(Phase::Validate),
        other => Err(format!("unknown phase '{other}'")),
    }
}

/// Splits a document into its front matter and body. The document must
/// open with the delimiter on its own line; the first subsequent line
/// consisting only of the delimiter closes the block.
fn split_front_matter(raw: &str) -> Result<(&str, &str), String> {
    let rest = raw.strip_prefix(FRONT_MATTER_DELIMITER).ok_or("missing opening front-matter delimiter")?;
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let end = rest.find("\n---").ok_or("missing closing front-matter delimiter")?;
    let front_matter = &rest[..end];
    let body = &rest[end + 4..];
    Ok((front_matter, body.strip_prefix('\n').unwrap_or(body)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_agent(dir: &Path, filename: &str, contents: &str) {
        std::fs::write(dir.join(filename), contents).unwrap();
    }

    #[test]
    fn loads_a_well_formed_definition() {
        let dir = tempfile::tempdir().unwrap();
        write_agent(
            dir.path(),
            "researcher.md",
            "---\nname: researcher\ndisplay_name: Researcher\nmodel: claude-opus\ntemperature: 0.3\nmax_tokens: 4096\ncapabilities:\n  - web-search\ncategory: research\nphase: research\ntools:\n  - search\ntags:\n  - core\n---\nInvestigate the task and summarize findings.\n",
        );

        let outcome = load_agent_definitions(dir.path());
        assert!(outcome.errors.is_empty(), "unexpected errors: {:?}", outcome.errors);
        assert_eq!(outcome.agents.len(), 1);
        let agent = &outcome.agents[0];
        assert_eq!(agent.name, "researcher");
        assert_eq!(agent.display_name, "Researcher");
        assert_eq!(agent.phase, Some(Phase::Research));
        assert_eq!(agent.instructions, "Investigate the task and summarize findings.");
    }

    #[test]
    fn malformed_front_matter_is_recorded_without_aborting_the_scan() {
        let dir = tempfile::tempdir().unwrap();
        write_agent(dir.path(), "broken.md", "no front matter here\n");
        write_agent(dir.path(), "ok.md", "---\nname: ok\n---\ndo things\n");

        let outcome = load_agent_definitions(dir.path());
        assert_eq!(outcome.agents.len(), 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.agents[0].name, "ok");
    }

    #[test]
    fn missing_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_agent(dir.path(), "nameless.md", "---\ndisplay_name: Nobody\n---\nbody\n");

        let outcome = load_agent_definitions(dir.path());
        assert!(outcome.agents.is_empty());
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn unknown_phase_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_agent(dir.path(), "weird.md", "---\nname: weird\nphase: nonexistent\n---\nbody\n");

        let outcome = load_agent_definitions(dir.path());
        assert!(outcome.agents.is_empty());
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn non_markdown_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write_agent(dir.path(), "notes.txt", "not an agent");
        let outcome = load_agent_definitions(dir.path());
        assert!(outcome.agents.is_empty());
        assert!(outcome.errors.is_empty());
    }
}
