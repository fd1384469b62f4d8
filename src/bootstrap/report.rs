use std::fmt;

use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Failed(String),
}

/// Result of one best-effort item (an extension, a template, a package).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub item: String,
    pub outcome: Outcome,
}
impl StepOutcome {
    pub fn done(item: impl Into<String>) -> Self {
        StepOutcome {
            item: item.into(),
            outcome: Outcome::Done,
        }
    }
    pub fn failed(item: impl Into<String>, reason: impl Into<String>) -> Self {
        StepOutcome {
            item: item.into(),
            outcome: Outcome::Failed(reason.into()),
        }
    }
    /// Records `result` for `item`, logging failures.
    pub fn from_result<T, E: fmt::Display>(item: impl Into<String>, result: Result<T, E>) -> Self {
        let item = item.into();
        match result {
            Ok(_) => StepOutcome::done(item),
            Err(e) => {
                warn!("{} failed: {}", item, e);
                StepOutcome::failed(item, e.to_string())
            }
        }
    }
    pub fn is_done(&self) -> bool {
        self.outcome == Outcome::Done
    }
}

#[derive(Debug, Default, Clone)]
pub struct SetupReport {
    pub extensions: Vec<StepOutcome>,
    pub templates: Vec<StepOutcome>,
    pub packages: Vec<StepOutcome>,
    pub public_url: Option<String>,
}
impl SetupReport {
    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.extensions
            .iter()
            .chain(&self.templates)
            .chain(&self.packages)
            .filter(|step| !step.is_done())
    }
}

impl fmt::Display for SetupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = |steps: &[StepOutcome]| steps.iter().filter(|s| s.is_done()).count();
        write!(
            f,
            "extensions {}/{}, templates {}/{}, packages {}/{}",
            count(&self.extensions),
            self.extensions.len(),
            count(&self.templates),
            self.templates.len(),
            count(&self.packages),
            self.packages.len(),
        )?;
        if let Some(url) = &self.public_url {
            write!(f, ", tunnel {url}")?;
        }
        Ok(())
    }
}
