//! Results of running a module's facts and examples.
//!
//! Totals are plain sums over both sections.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResults {
    pub module_name: String,
    pub display_uri: String,
    pub facts: TestSectionResults,
    pub examples: TestSectionResults,
    /// Log lines emitted while the tests ran.
    pub logs: String,
}

impl TestResults {
    #[must_use]
    pub fn total_tests(&self) -> usize {
        self.facts.total_tests() + self.examples.total_tests()
    }

    #[must_use]
    pub fn total_failures(&self) -> usize {
        self.facts.total_failures() + self.examples.total_failures()
    }

    #[must_use]
    pub fn total_errors(&self) -> usize {
        self.facts.total_errors() + self.examples.total_errors()
    }

    #[must_use]
    pub fn failed(&self) -> bool {
        self.facts.failed() || self.examples.failed()
    }

    /// Whether any example had its expected output written by this run.
    #[must_use]
    pub fn is_example_written(&self) -> bool {
        self.examples.results.iter().any(|r| r.is_example_written)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSectionResults {
    pub results: Vec<TestResult>,
}

impl TestSectionResults {
    #[must_use]
    pub fn total_tests(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn total_failures(&self) -> usize {
        self.results.iter().map(|r| r.failures.len()).sum()
    }

    #[must_use]
    pub fn total_errors(&self) -> usize {
        self.results.iter().map(|r| r.errors.len()).sum()
    }

    #[must_use]
    pub fn failed(&self) -> bool {
        self.results.iter().any(TestResult::failed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub name: String,
    pub total_asserts: usize,
    pub failures: Vec<String>,
    pub errors: Vec<String>,
    pub is_example_written: bool,
}

impl TestResult {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failed(&self) -> bool {
        !self.failures.is_empty() || !self.errors.is_empty()
    }

    #[must_use]
    pub fn total_failures(&self) -> usize {
        self.failures.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, failures: usize, errors: usize) -> TestResult {
        TestResult {
            name: name.into(),
            total_asserts: 3,
            failures: vec!["f".into(); failures],
            errors: vec!["e".into(); errors],
            is_example_written: false,
        }
    }

    #[test]
    fn totals_are_sums_over_sections() {
        let results = TestResults {
            facts: TestSectionResults {
                results: vec![result("a", 1, 0), result("b", 0, 0)],
            },
            examples: TestSectionResults {
                results: vec![result("c", 2, 1)],
            },
            ..TestResults::default()
        };
        assert_eq!(results.total_tests(), 3);
        assert_eq!(results.total_failures(), 3);
        assert_eq!(results.total_errors(), 1);
        assert!(results.failed());
    }

    #[test]
    fn empty_results_pass() {
        let results = TestResults::default();
        assert!(!results.failed());
        assert!(!results.is_example_written());
        assert!(!result("ok", 0, 0).failed());
    }
}
