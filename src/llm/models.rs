use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

// One entry of a chat-style message list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// What gets sent to a backend: role-tagged messages plus sampling temperature.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub messages: Vec<Message>,
    pub temperature: f32,
}

impl Prompt {
    pub fn instruction(text: impl Into<String>, temperature: f32) -> Self {
        Self {
            messages: vec![Message {
                role: Role::User,
                content: text.into(),
            }],
            temperature,
        }
    }

    pub fn chat(system: impl Into<String>, user: impl Into<String>, temperature: f32) -> Self {
        Self {
            messages: vec![
                Message {
                    role: Role::System,
                    content: system.into(),
                },
                Message {
                    role: Role::User,
                    content: user.into(),
                },
            ],
            temperature,
        }
    }

    /// Single-string form for completion endpoints.
    pub fn as_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// How raw model output is cleaned before it is handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Sql,
    Code,
    Text,
}

/// A generation request. Each variant maps to one prompt template.
#[derive(Debug, Clone, Copy)]
pub enum Task<'a> {
    CreateTable { description: &'a str },
    Select { question: &'a str, schema: &'a str },
    Manipulation { command: &'a str, schema: &'a str },
    Migration { command: &'a str, table_schema: &'a str },
    Code { prompt: &'a str },
    Insight { question: &'a str, data: &'a Value },
    Chat { message: &'a str },
}

impl Task<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Task::CreateTable { .. } => "create_table",
            Task::Select { .. } => "select",
            Task::Manipulation { .. } => "manipulation",
            Task::Migration { .. } => "migration",
            Task::Code { .. } => "code",
            Task::Insight { .. } => "insight",
            Task::Chat { .. } => "chat",
        }
    }

    pub fn output(&self) -> OutputKind {
        match self {
            Task::CreateTable { .. }
            | Task::Select { .. }
            | Task::Manipulation { .. }
            | Task::Migration { .. } => OutputKind::Sql,
            Task::Code { .. } => OutputKind::Code,
            Task::Insight { .. } | Task::Chat { .. } => OutputKind::Text,
        }
    }
}
