//! One full run: extract the roundup, then resolve and fact-check every
//! record with bounded concurrency, then write the JSON output.

use std::path::Path;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::error::PipelineError;
use crate::extract::{Extraction, ExtractionPipeline, Tier};
use crate::factcheck::FactChecker;
use crate::output;
use crate::record::{AccountRecord, Verification};
use crate::resolve::LinkResolver;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub url: String,
    pub resolve: bool,
    pub fact_check: bool,
    pub concurrency: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerdictCounts {
    pub verified: usize,
    pub rejected: usize,
    pub unknown: usize,
    pub failed: usize,
    pub unchecked: usize,
}

impl VerdictCounts {
    pub fn tally(records: &[AccountRecord]) -> Self {
        let mut counts = VerdictCounts::default();
        for r in records {
            match r.verification {
                Some(Verification::Verified) => counts.verified += 1,
                Some(Verification::Rejected) => counts.rejected += 1,
                Some(Verification::Unknown) => counts.unknown += 1,
                Some(Verification::Failed) => counts.failed += 1,
                None => counts.unchecked += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub tier: Tier,
    pub records: Vec<AccountRecord>,
    pub resolved: usize,
    pub verdicts: VerdictCounts,
    pub elapsed: Duration,
}

pub struct Runner {
    extraction: ExtractionPipeline,
    resolver: LinkResolver,
    checker: FactChecker,
}

impl Runner {
    pub fn new(extraction: ExtractionPipeline, resolver: LinkResolver, checker: FactChecker) -> Self {
        Runner {
            extraction,
            resolver,
            checker,
        }
    }

    /// Extract, then enrich records concurrently. Output order matches
    /// extraction order; a failed enrichment only degrades its record.
    pub async fn run(&self, opts: &RunOptions) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        let Extraction { tier, records } = self.extraction.run(&opts.url).await?;
        info!(
            "Enriching {} records (resolve: {}, fact-check: {}, concurrency: {})",
            records.len(),
            opts.resolve,
            opts.fact_check,
            opts.concurrency
        );

        let pb = progress_bar(records.len());
        let bar = &pb;
        let records: Vec<AccountRecord> = stream::iter(records)
            .map(move |mut record| async move {
                if opts.resolve {
                    self.resolver.resolve(&mut record).await;
                }
                if opts.fact_check {
                    self.checker.check(&mut record).await;
                }
                bar.inc(1);
                record
            })
            .buffered(opts.concurrency.max(1))
            .collect()
            .await;
        pb.finish_and_clear();

        let resolved = records.iter().filter(|r| r.resolved_link().is_some()).count();
        let verdicts = VerdictCounts::tally(&records);
        Ok(RunReport {
            tier,
            records,
            resolved,
            verdicts,
            elapsed: started.elapsed(),
        })
    }

    /// Run and write the output file. Nothing is written if extraction
    /// found no accounts.
    pub async fn run_to_file(&self, opts: &RunOptions, path: &Path) -> anyhow::Result<RunReport> {
        let report = self.run(opts).await?;
        output::write_records(path, &report.records)?;
        info!("Wrote {} records to {}", report.records.len(), path.display());
        Ok(report)
    }
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

// ── Tests ──
