use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitCategory {
    /// Region listings (states, municipalities).
    Metadata,
    Page,
    Case,
    Certificate,
    CsvExport,
}

impl UnitCategory {
    pub const ALL: [UnitCategory; 5] = [
        UnitCategory::Metadata,
        UnitCategory::Page,
        UnitCategory::Case,
        UnitCategory::Certificate,
        UnitCategory::CsvExport,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            UnitCategory::Metadata => "metadata",
            UnitCategory::Page => "pages",
            UnitCategory::Case => "cases",
            UnitCategory::Certificate => "certificates",
            UnitCategory::CsvExport => "csv exports",
        }
    }
}

/// Terminal result of one unit within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    Succeeded,
    /// Already completed by an earlier attempt.
    Skipped,
    PermanentError,
    /// Retries exhausted or the payload could not be stored.
    Failed,
    Malformed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CategoryCounts {
    pub succeeded: u64,
    pub skipped: u64,
    pub permanent_errors: u64,
    pub failed: u64,
    pub malformed: u64,
}

impl CategoryCounts {
    pub fn errors(&self) -> u64 {
        self.permanent_errors + self.failed + self.malformed
    }

    pub fn total(&self) -> u64 {
        self.succeeded + self.skipped + self.errors()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunSummary {
    metadata: CategoryCounts,
    pages: CategoryCounts,
    cases: CategoryCounts,
    certificates: CategoryCounts,
    csv_exports: CategoryCounts,
}

impl RunSummary {
    pub fn record(&mut self, category: UnitCategory, outcome: UnitOutcome) {
        let counts = self.counts_mut(category);
        match outcome {
            UnitOutcome::Succeeded => counts.succeeded += 1,
            UnitOutcome::Skipped => counts.skipped += 1,
            UnitOutcome::PermanentError => counts.permanent_errors += 1,
            UnitOutcome::Failed => counts.failed += 1,
            UnitOutcome::Malformed => counts.malformed += 1,
        }
    }

    pub fn counts(&self, category: UnitCategory) -> CategoryCounts {
        match category {
            UnitCategory::Metadata => self.metadata,
            UnitCategory::Page => self.pages,
            UnitCategory::Case => self.cases,
            UnitCategory::Certificate => self.certificates,
            UnitCategory::CsvExport => self.csv_exports,
        }
    }

    pub fn total_errors(&self) -> u64 {
        UnitCategory::ALL
            .iter()
            .map(|category| self.counts(*category).errors())
            .sum()
    }

    fn counts_mut(&mut self, category: UnitCategory) -> &mut CategoryCounts {
        match category {
            UnitCategory::Metadata => &mut self.metadata,
            UnitCategory::Page => &mut self.pages,
            UnitCategory::Case => &mut self.cases,
            UnitCategory::Certificate => &mut self.certificates,
            UnitCategory::CsvExport => &mut self.csv_exports,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<14} {:>9} {:>9} {:>9} {:>9} {:>9}",
            "", "ok", "skipped", "permanent", "failed", "malformed"
        )?;
        for category in UnitCategory::ALL {
            let counts = self.counts(category);
            if counts.total() == 0 {
                continue;
            }
            writeln!(
                f,
                "{:<14} {:>9} {:>9} {:>9} {:>9} {:>9}",
                category.label(),
                counts.succeeded,
                counts.skipped,
                counts.permanent_errors,
                counts.failed,
                counts.malformed
            )?;
        }
        Ok(())
    }
}
