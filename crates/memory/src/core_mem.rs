//! Core memory: the always-included context sections.
//!
//! A singleton set of named sections (persona, human, system facts, user
//! facts, custom). Updated only via explicit append/replace commands and
//! persisted; never evicted or trimmed.

use hearthmind_core::error::MemoryError;
use hearthmind_core::token::estimate_tokens;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which core section a command targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreSection {
    Persona,
    Human,
    SystemFacts,
    UserFacts,
    Custom(String),
}

impl std::fmt::Display for CoreSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Persona => write!(f, "persona"),
            Self::Human => write!(f, "human"),
            Self::SystemFacts => write!(f, "system_facts"),
            Self::UserFacts => write!(f, "user_facts"),
            Self::Custom(name) => write!(f, "custom.{name}"),
        }
    }
}

/// The core tier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreMemory {
    /// Who the assistant is.
    pub persona: String,

    /// Who the user is.
    pub human: String,

    /// Standing facts about the system/domain.
    pub system_facts: Vec<String>,

    /// Learned facts about the user.
    pub user_facts: Vec<String>,

    /// Named free-form sections.
    pub custom: BTreeMap<String, String>,
}

impl CoreMemory {
    /// Replace a section's content. Fact sections are replaced wholesale
    /// from newline-separated input.
    pub fn replace(&mut self, section: &CoreSection, content: &str) {
        match section {
            CoreSection::Persona => self.persona = content.to_string(),
            CoreSection::Human => self.human = content.to_string(),
            CoreSection::SystemFacts => {
                self.system_facts = content.lines().map(str::to_string).collect()
            }
            CoreSection::UserFacts => {
                self.user_facts = content.lines().map(str::to_string).collect()
            }
            CoreSection::Custom(name) => {
                self.custom.insert(name.clone(), content.to_string());
            }
        }
    }

    /// Append to a section. Fact sections gain one entry; text sections
    /// gain a separated line.
    pub fn append(&mut self, section: &CoreSection, content: &str) {
        match section {
            CoreSection::Persona => append_line(&mut self.persona, content),
            CoreSection::Human => append_line(&mut self.human, content),
            CoreSection::SystemFacts => self.system_facts.push(content.to_string()),
            CoreSection::UserFacts => self.user_facts.push(content.to_string()),
            CoreSection::Custom(name) => {
                let entry = self.custom.entry(name.clone()).or_default();
                append_line(entry, content);
            }
        }
    }

    /// Fetch a section's current content.
    pub fn get(&self, section: &CoreSection) -> Result<String, MemoryError> {
        Ok(match section {
            CoreSection::Persona => self.persona.clone(),
            CoreSection::Human => self.human.clone(),
            CoreSection::SystemFacts => self.system_facts.join("\n"),
            CoreSection::UserFacts => self.user_facts.join("\n"),
            CoreSection::Custom(name) => self
                .custom
                .get(name)
                .cloned()
                .ok_or_else(|| MemoryError::UnknownSection(name.clone()))?,
        })
    }

    /// Render the core tier as the leading context block.
    pub fn render(&self) -> String {
        let mut out = String::from("## Core Memory\n");
        if !self.persona.is_empty() {
            out.push_str(&format!("### Persona\n{}\n", self.persona));
        }
        if !self.human.is_empty() {
            out.push_str(&format!("### User\n{}\n", self.human));
        }
        if !self.system_facts.is_empty() {
            out.push_str("### System Facts\n");
            for fact in &self.system_facts {
                out.push_str(&format!("- {fact}\n"));
            }
        }
        if !self.user_facts.is_empty() {
            out.push_str("### User Facts\n");
            for fact in &self.user_facts {
                out.push_str(&format!("- {fact}\n"));
            }
        }
        for (name, content) in &self.custom {
            out.push_str(&format!("### {name}\n{content}\n"));
        }
        out
    }

    /// Token estimate of the rendered block.
    pub fn token_est(&self) -> usize {
        estimate_tokens(&self.render())
    }
}

fn append_line(target: &mut String, content: &str) {
    if !target.is_empty() {
        target.push('\n');
    }
    target.push_str(content);
}
