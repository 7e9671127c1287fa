// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! This module contains the configuration options for building reports.

/// Configuration options for building reports.
#[derive(Clone, Debug)]
pub struct ReportConfig {
    /// The maximum number of expression nodes that a single formula
    /// evaluation may visit, including the nodes of referenced formulas and
    /// scope aggregates like `GLOB`.  Evaluations that exceed it fail with an
    /// `Evaluation` error.
    pub evaluation_budget: usize,

    /// The number of decimal places used when exporting numbers.  When `None`,
    /// numbers are exported with their shortest exact representation.
    pub decimal_places: Option<usize>,

    /// Whether columns over generation fields should render as "no data" for
    /// rows whose entity is not generation-capable.
    pub hide_generation_for_consumers: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            evaluation_budget: 10_000,
            decimal_places: None,
            hide_generation_for_consumers: true,
        }
    }
}
