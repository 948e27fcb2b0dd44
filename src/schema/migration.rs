use crate::core::{DbError, Result};
use std::collections::BTreeMap;

/// Statements that move the schema from one version to the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMigrationStep {
    pub from_version: u32,
    pub to_version: u32,
    pub statements: Vec<String>,
}

impl SchemaMigrationStep {
    pub fn new(from_version: u32, to_version: u32) -> Self {
        Self {
            from_version,
            to_version,
            statements: Vec::new(),
        }
    }

    pub fn with_statement(mut self, statement: impl Into<String>) -> Self {
        self.statements.push(statement.into());
        self
    }

    fn label(&self) -> String {
        format!("{}->{}", self.from_version, self.to_version)
    }
}

/// Upgrade path of a set of schema scripts, keyed by the version each step
/// starts from. Steps never overlap, so any stored version has at most one
/// way forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMigrationPlan {
    target_version: u32,
    steps: BTreeMap<u32, SchemaMigrationStep>,
}

impl SchemaMigrationPlan {
    pub fn new(target_version: u32) -> Self {
        Self {
            target_version,
            steps: BTreeMap::new(),
        }
    }

    /// Version the scripts create; every chain ends here.
    pub fn target_version(&self) -> u32 {
        self.target_version
    }

    /// Steps in upgrade order.
    pub fn steps(&self) -> impl Iterator<Item = &SchemaMigrationStep> {
        self.steps.values()
    }

    pub fn add_step(&mut self, step: SchemaMigrationStep) -> Result<()> {
        if step.from_version == 0 || step.to_version <= step.from_version {
            return Err(DbError::Configuration(format!(
                "migration {} must start at version 1 or later and raise the version",
                step.label()
            )));
        }
        if step.to_version > self.target_version {
            return Err(DbError::Configuration(format!(
                "migration {} goes past schema version {}",
                step.label(),
                self.target_version
            )));
        }
        // The closest step starting below our end is the only one that can overlap.
        if let Some((_, previous)) = self.steps.range(..step.to_version).next_back() {
            if previous.to_version > step.from_version {
                return Err(DbError::Configuration(format!(
                    "migration {} overlaps migration {}",
                    step.label(),
                    previous.label()
                )));
            }
        }
        self.steps.insert(step.from_version, step);
        Ok(())
    }

    /// Version ranges below the target that no step covers, as `(from, to)`.
    pub fn gaps(&self) -> Vec<(u32, u32)> {
        let mut gaps = Vec::new();
        let mut cursor = 1;
        for step in self.steps.values() {
            if step.from_version > cursor {
                gaps.push((cursor, step.from_version));
            }
            cursor = step.to_version;
        }
        if cursor < self.target_version {
            gaps.push((cursor, self.target_version));
        }
        gaps
    }

    /// Ordered steps taking a schema at `from_version` to the target version.
    pub fn resolve_chain(&self, from_version: u32) -> Result<Vec<&SchemaMigrationStep>> {
        if from_version > self.target_version {
            return Err(DbError::SchemaMismatch {
                expected: self.target_version.to_string(),
                found: from_version.to_string(),
            });
        }

        let mut cursor = from_version;
        let mut chain = Vec::new();
        while cursor < self.target_version {
            let Some(step) = self.steps.get(&cursor) else {
                let uncovered = self
                    .gaps()
                    .iter()
                    .map(|(from, to)| format!("{from}->{to}"))
                    .collect::<Vec<_>>();
                return Err(DbError::Configuration(format!(
                    "no migration leaves schema version {} on the way to {} (uncovered: {})",
                    cursor,
                    self.target_version,
                    if uncovered.is_empty() {
                        "none, version falls inside a step".to_string()
                    } else {
                        uncovered.join(", ")
                    }
                )));
            };
            chain.push(step);
            cursor = step.to_version;
        }

        Ok(chain)
    }
}
