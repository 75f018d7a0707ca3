mod collab;
mod error;
mod extract;
mod factcheck;
mod normalize;
mod output;
mod pipeline;
mod record;
mod resolve;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::warn;

use collab::gemini::{GeminiClient, GeminiExtractor};
use collab::search::SpiderSearch;
use collab::spider::SpiderFetcher;
use collab::{AnchorScanner, Fetcher, LanguageModel};
use extract::ExtractionPipeline;
use factcheck::FactChecker;
use normalize::NormalizationRules;
use pipeline::{RunOptions, RunReport, Runner};
use record::AccountRecord;
use resolve::policy::{source_host, LinkPolicy};
use resolve::LinkResolver;
use settings::Settings;

#[derive(Parser)]
#[command(name = "hysa_scraper", about = "High-yield savings roundup scraper via spider.cloud")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract the roundup, resolve bank links, fact-check APYs and write JSON
    Run {
        /// Roundup page (default: TARGET_URL or the NerdWallet HYSA list)
        #[arg(long)]
        url: Option<String>,
        /// Output file (default: OUTPUT_PATH or data/hysa_accounts.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Skip the LLM fact-check
        #[arg(long)]
        no_fact_check: bool,
        /// Keep roundup links as they are
        #[arg(long)]
        no_resolve: bool,
        /// Records enriched at once
        #[arg(short = 'c', long)]
        concurrency: Option<usize>,
    },
    /// Run the extraction tiers only and print what they found
    Extract {
        #[arg(long)]
        url: Option<String>,
    },
    /// Resolve one institution's own savings page
    Resolve {
        institution: String,
        /// Roundup/affiliate link to start from
        #[arg(long)]
        referral: Option<String>,
    },
    /// Fact-check one APY claim
    Check {
        institution: String,
        apy: String,
        #[arg(long)]
        link: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;

    let result = match cli.command {
        Commands::Run {
            url,
            output,
            no_fact_check,
            no_resolve,
            concurrency,
        } => {
            let url = url.unwrap_or_else(|| settings.target_url.clone());
            let output = output.unwrap_or_else(|| settings.output_path.clone());
            let services = Services::connect(&settings)?;
            let runner = Runner::new(
                services.extraction(&settings, &url),
                services.resolver(&settings, &url)?,
                fact_checker(&settings),
            );
            let opts = RunOptions {
                url,
                resolve: !no_resolve,
                fact_check: !no_fact_check,
                concurrency: concurrency.unwrap_or(settings.concurrency),
            };
            println!("Scraping {} ...", opts.url);
            let report = runner.run_to_file(&opts, &output).await?;
            print_summary(&report, &output);
            Ok(())
        }
        Commands::Extract { url } => {
            let url = url.unwrap_or_else(|| settings.target_url.clone());
            let services = Services::connect(&settings)?;
            let extraction = services.extraction(&settings, &url).run(&url).await?;
            println!(
                "{:>3} | {:<32} | {:<24} | {}",
                "#", "Institution", "APY", "Link"
            );
            println!("{}", "-".repeat(100));
            for (i, r) in extraction.records.iter().enumerate() {
                println!(
                    "{:>3} | {:<32} | {:<24} | {}",
                    i + 1,
                    truncate(&r.institution, 32),
                    truncate(&r.apy, 24),
                    r.referring_link.as_deref().unwrap_or("-")
                );
            }
            println!(
                "\n{} accounts from the {} tier",
                extraction.records.len(),
                extraction.tier
            );
            Ok(())
        }
        Commands::Resolve {
            institution,
            referral,
        } => {
            let Some(mut record) = AccountRecord::new(institution, "n/a".into(), referral) else {
                bail!("institution must not be empty");
            };
            let services = Services::connect(&settings)?;
            let resolver = services.resolver(&settings, &settings.target_url)?;
            match resolver.resolve(&mut record).await {
                Some(how) => println!(
                    "{} -> {} (via {})",
                    record.institution,
                    record.resolved_link().unwrap_or("-"),
                    how
                ),
                None => println!("{}: unresolved", record.institution),
            }
            if !record.notes().is_empty() {
                println!("Notes: {}", record.notes());
            }
            Ok(())
        }
        Commands::Check {
            institution,
            apy,
            link,
        } => {
            let Some(mut record) = AccountRecord::new(institution, apy, link) else {
                bail!("institution and APY must not be empty");
            };
            let verdict = fact_checker(&settings).check(&mut record).await;
            println!("{} {}: {}", record.institution, record.apy, verdict.as_str());
            if !record.notes().is_empty() {
                println!("Notes: {}", record.notes());
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Live collaborators backed by spider.cloud and, when keyed, Gemini.
struct Services {
    fetcher: Arc<dyn Fetcher>,
    gemini: Option<Arc<GeminiClient>>,
    search: Arc<SpiderSearch>,
}

impl Services {
    fn connect(settings: &Settings) -> anyhow::Result<Self> {
        let key = settings.spider_key()?;
        let fetcher: Arc<dyn Fetcher> =
            Arc::new(SpiderFetcher::new(key).context("creating spider.cloud client")?);
        let gemini = gemini_client(settings);
        if gemini.is_none() {
            warn!("GEMINI_API_KEY not set; schema extraction and fact-checking are disabled");
        }
        Ok(Services {
            fetcher,
            gemini,
            search: Arc::new(SpiderSearch::new(key)),
        })
    }

    fn extraction(&self, settings: &Settings, url: &str) -> ExtractionPipeline {
        let pipeline = ExtractionPipeline::new(
            self.fetcher.clone(),
            Arc::new(NormalizationRules::default()),
            source_host(url),
            settings.timeouts(),
        );
        match &self.gemini {
            Some(client) => pipeline.with_extractor(Arc::new(GeminiExtractor::new(
                self.fetcher.clone(),
                client.clone(),
            ))),
            None => pipeline,
        }
    }

    fn resolver(&self, settings: &Settings, source: &str) -> anyhow::Result<LinkResolver> {
        let policy = Arc::new(LinkPolicy::for_source(source));
        Ok(LinkResolver::new(policy, settings.timeouts().search)
            .with_scanner(self.anchor_scanner()?)
            .with_search(self.search.clone()))
    }

    #[cfg(not(feature = "render"))]
    fn anchor_scanner(&self) -> anyhow::Result<Arc<dyn AnchorScanner>> {
        let scanner = collab::anchors::HttpAnchorScanner::new().context("creating HTTP client")?;
        Ok(Arc::new(scanner))
    }

    #[cfg(feature = "render")]
    fn anchor_scanner(&self) -> anyhow::Result<Arc<dyn AnchorScanner>> {
        Ok(Arc::new(collab::anchors::RenderedAnchorScanner::new(
            self.fetcher.clone(),
        )))
    }
}

fn gemini_client(settings: &Settings) -> Option<Arc<GeminiClient>> {
    let key = settings.gemini_api_key.as_deref()?;
    Some(Arc::new(GeminiClient::new(key, &settings.gemini_model)))
}

fn fact_checker(settings: &Settings) -> FactChecker {
    let model = gemini_client(settings).map(|c| c as Arc<dyn LanguageModel>);
    FactChecker::new(model, settings.timeouts().llm)
}

fn print_summary(report: &RunReport, output: &std::path::Path) {
    let n = report.records.len();
    let v = &report.verdicts;
    println!(
        "Saved {} accounts to {} ({} tier)",
        n,
        output.display(),
        report.tier
    );
    println!("Resolved links: {}/{}", report.resolved, n);
    println!(
        "Verdicts: {} verified, {} rejected, {} unknown, {} failed, {} unchecked",
        v.verified, v.rejected, v.unknown, v.failed, v.unchecked
    );
    println!("Run took {}", format_duration(report.elapsed));
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn durations() {
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn truncation_keeps_width() {
        assert_eq!(truncate("SoFi", 10), "SoFi");
        assert_eq!(truncate("Marcus by Goldman Sachs", 10), "Marcus ...");
        assert_eq!(truncate("Marcus by Goldman Sachs", 10).chars().count(), 10);
    }

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::try_parse_from(["hysa_scraper", "run", "--no-fact-check", "-c", "8", "-o", "out.json"]).unwrap();
        match cli.command {
            Commands::Run {
                no_fact_check,
                no_resolve,
                concurrency,
                output,
                url,
            } => {
                assert!(no_fact_check);
                assert!(!no_resolve);
                assert_eq!(concurrency, Some(8));
                assert_eq!(output, Some(PathBuf::from("out.json")));
                assert!(url.is_none());
            }
            _ => panic!("expected run"),
        }
    }
}
