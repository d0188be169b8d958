//! System prompt composition.
//!
//! The prompt is four fixed sections followed by the file context, in this
//! order: grounding rules, output-mode rules, the intent sentence, then the
//! [`CONTEXT_LABEL`] line with the context text (or [`NO_FILES_SENTINEL`]).
//! Every instruction is a literal; nothing is data-driven.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Introduces the file context at the end of the prompt.
pub const CONTEXT_LABEL: &str = "Course file context:";

/// Stands in for the file context when no file yielded text.
pub const NO_FILES_SENTINEL: &str = "(No course files found for this conversation.)";

const SECTION_SEPARATOR: &str = "\n\n";

const GROUNDING_RULES: &[&str] = &[
    "You are a study assistant for a university course.",
    "Rely on the course file context below as your primary source.",
    "If the files do not contain the information needed, say explicitly that it is missing from the files.",
    "Never invent or fabricate content and never attribute to the files anything they do not say.",
    "When the context includes slide labels, cite the slide numbers you used (for example \"SLIDE 3\").",
    "If the request is ambiguous, ask at most two short clarifying questions before answering.",
];

const QUICK_RULES: &[&str] = &[
    "Format: compact bullet points only, no long paragraphs.",
    "Give exactly 3 key takeaways.",
    "End with exactly 3 practice questions.",
];

const FULL_RULES: &[&str] = &[
    "Format: use these sections in this order: Summary, Key Concepts, Examples, Common Pitfalls, Practice Questions.",
    "In Practice Questions, give 5 question and answer pairs.",
];

const STUDY_READY_RULES: &[&str] = &[
    "Format: use these sections in this order: Summary, 7-Day Study Plan, Flashcards, Quiz, Revision Checklist.",
    "Write each flashcard as a Q: / A: pair.",
    "Include the answers to every quiz question.",
];

/// What the student wants emphasised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Summary,
    StudyPlan,
    PracticeQuestions,
    #[default]
    Custom,
}

impl Intent {
    pub const ALL: [Intent; 4] = [
        Intent::Summary,
        Intent::StudyPlan,
        Intent::PracticeQuestions,
        Intent::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Summary => "summary",
            Intent::StudyPlan => "study_plan",
            Intent::PracticeQuestions => "practice_questions",
            Intent::Custom => "custom",
        }
    }

    pub fn rule(&self) -> &'static str {
        match self {
            Intent::Summary => "Priority: produce a clear, faithful summary of the course material.",
            Intent::StudyPlan => "Priority: turn the material into a realistic study plan.",
            Intent::PracticeQuestions => {
                "Priority: focus on practice questions that test understanding of the material."
            }
            Intent::Custom => "Priority: answer the student's message directly.",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Intent::ALL
            .into_iter()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| format!("unknown intent: {}", s))
    }
}

/// How the answer should be laid out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    Quick,
    #[default]
    Full,
    StudyReady,
}

impl OutputMode {
    pub const ALL: [OutputMode; 3] = [OutputMode::Quick, OutputMode::Full, OutputMode::StudyReady];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputMode::Quick => "quick",
            OutputMode::Full => "full",
            OutputMode::StudyReady => "study_ready",
        }
    }

    /// The formatting instructions of this mode.
    pub fn rules(&self) -> &'static [&'static str] {
        match self {
            OutputMode::Quick => QUICK_RULES,
            OutputMode::Full => FULL_RULES,
            OutputMode::StudyReady => STUDY_READY_RULES,
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OutputMode::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown output mode: {}", s))
    }
}

/// Renders the system prompt for one turn.
pub fn compose(intent: Intent, mode: OutputMode, files_text: &str) -> String {
    let context = if files_text.trim().is_empty() {
        NO_FILES_SENTINEL
    } else {
        files_text
    };

    [
        GROUNDING_RULES.join("\n"),
        mode.rules().join("\n"),
        intent.rule().to_string(),
        format!("{}\n{}", CONTEXT_LABEL, context),
    ]
    .join(SECTION_SEPARATOR)
}
