use std::fs;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use carbon_score::format::{format_annual_kg, format_co2};
use carbon_score::session::{AnalysisKind, CreditPackage, CREDIT_PACKAGES};
use carbon_score::{
    estimate, list_normalization_rules, normalize_target_url, parse_findings, CarbonError,
    EmissionReport, EstimateOptions, JsonFileStore, RawEmissionInput, RngSource, Role, Session,
    StoredAnalysis, WebsiteAnalysis,
};
use chrono::Local;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use rayon::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Per-pageview carbon estimation CLI", long_about = None)]
struct Cli {
    /// Directory holding the session and the last analysis
    #[arg(long, global = true, default_value = ".cache/carbon_score", value_hint = ValueHint::DirPath)]
    cache_dir: PathBuf,

    /// Verbose logging
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Estimate from explicit score / emissions figures
    Estimate(EstimateArgs),
    /// Estimate from a website-analysis response and remember it as the last analysis
    Analyze(AnalyzeArgs),
    /// Estimate many website-analysis responses into one CSV
    Batch(BatchArgs),
    /// Show the last stored analysis
    Last(OutputArgs),
    /// Validate a repository-analysis response and summarise its findings
    Findings(FindingsArgs),
    /// List the normalization rules
    Rules,
    /// Manage the signed-in user and credits
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Args, Debug, Clone)]
struct EngineArgs {
    /// JSON file with estimate options (globalAverage, monthlyViews, strict)
    #[arg(long, value_hint = ValueHint::FilePath)]
    options: Option<PathBuf>,

    /// Global-average baseline in grams per page view
    #[arg(long)]
    global_average: Option<f64>,

    /// Assumed monthly page views for the annual projection
    #[arg(long)]
    monthly_views: Option<u32>,

    /// Fail on ambiguous or out-of-range input instead of falling back
    #[arg(long, action = ArgAction::SetTrue)]
    strict: bool,

    /// Seed for the placeholder estimate
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug, Clone)]
struct OutputArgs {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(Parser, Debug)]
struct EstimateArgs {
    /// Upstream sustainability score (0-100)
    #[arg(long, allow_hyphen_values = true)]
    score: Option<i32>,

    /// Reported emissions; unit inferred from magnitude
    #[arg(long, allow_hyphen_values = true)]
    emissions: Option<f64>,

    /// Hosting reported as renewable-powered
    #[arg(long)]
    green: Option<bool>,

    #[command(flatten)]
    engine: EngineArgs,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Parser, Debug)]
struct AnalyzeArgs {
    /// Website-analysis JSON (`-` for stdin)
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// URL the payload belongs to
    #[arg(long)]
    url: Option<String>,

    /// Deduct website-analysis credits from the signed-in user
    #[arg(long, action = ArgAction::SetTrue)]
    charge: bool,

    /// Do not store the result as the last analysis
    #[arg(long, action = ArgAction::SetTrue)]
    no_store: bool,

    #[command(flatten)]
    engine: EngineArgs,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Parser, Debug)]
struct BatchArgs {
    /// Website-analysis JSON files
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Parser, Debug)]
struct FindingsArgs {
    /// Repository-analysis JSON (`-` for stdin)
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Deduct repository-analysis credits from the signed-in user
    #[arg(long, action = ArgAction::SetTrue)]
    charge: bool,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Subcommand, Debug)]
enum SessionAction {
    /// Sign in as a user (or admin)
    SignIn {
        email: String,
        #[arg(long, action = ArgAction::SetTrue)]
        admin: bool,
    },
    /// Show the signed-in user and balance
    Status,
    /// Add credits to the signed-in user
    AddCredits { amount: u32 },
    /// Buy a credit package (50, 100, 500 or 1000 credits)
    Purchase { credits: u32 },
    /// List the credit packages on offer
    Packages,
    /// Forget the signed-in user
    SignOut,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Estimate(args) => handle_estimate(args),
        Command::Analyze(args) => handle_analyze(args, &cli.cache_dir),
        Command::Batch(args) => handle_batch(args),
        Command::Last(args) => handle_last(args, &cli.cache_dir),
        Command::Findings(args) => handle_findings(args, &cli.cache_dir),
        Command::Rules => handle_rules(),
        Command::Session { action } => handle_session(action, &cli.cache_dir),
    }
}

fn resolve_options(args: &EngineArgs) -> Result<EstimateOptions> {
    let mut options = match args.options.as_ref() {
        Some(path) => load_options(path)?,
        None => EstimateOptions::default(),
    };
    if let Some(avg) = args.global_average {
        options.global_average_g = avg;
    }
    if let Some(views) = args.monthly_views {
        options.monthly_views = views;
    }
    if args.strict {
        options.strict = true;
    }
    Ok(options)
}

fn load_options(path: &Path) -> Result<EstimateOptions> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read options {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid options JSON", path.display()))
}

fn run_engine(input: &RawEmissionInput, args: &EngineArgs) -> Result<EmissionReport> {
    let options = resolve_options(args)?;
    let report = match args.seed {
        Some(seed) => estimate(input, &options, &mut RngSource::seeded(seed))?,
        None => estimate(input, &options, &mut RngSource::thread())?,
    };
    if report.is_placeholder {
        warn!("estimate is a placeholder; no emissions or score were available");
    }
    Ok(report)
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("failed to read stdin")?;
        Ok(text)
    } else {
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
    }
}

fn handle_estimate(args: EstimateArgs) -> Result<()> {
    let input = RawEmissionInput {
        score_hint: args.score,
        reported_emissions: args.emissions,
        is_green_hosted: args.green,
    };
    let report = run_engine(&input, &args.engine)?;
    print_report(&report, None, args.output.format)
}

fn handle_analyze(args: AnalyzeArgs, cache_dir: &Path) -> Result<()> {
    let url = args.url.as_deref().map(normalize_target_url).transpose()?;
    let text = read_input(&args.input)?;
    let analysis = WebsiteAnalysis::from_json(&text)
        .with_context(|| format!("failed to parse {}", args.input.display()))?;
    let url = url.or_else(|| analysis.project.clone());

    let mut store = JsonFileStore::open(cache_dir)?;
    let mut session = if args.charge {
        let session = Session::restore(&mut store)?;
        check_balance(&session, AnalysisKind::Website)?;
        Some(session)
    } else {
        None
    };

    let report = run_engine(&analysis.to_input(), &args.engine)?;
    if let Some(session) = session.as_mut() {
        charge_session(session, &mut store, AnalysisKind::Website)?;
    }
    if !args.no_store {
        StoredAnalysis::new(url.clone(), report.clone()).save(&mut store)?;
        info!("Stored last analysis in {}", store.dir().display());
    }
    print_report(&report, url.as_deref(), args.output.format)
}

// Fails early, before any work, when the balance cannot cover `kind`.
fn check_balance(session: &Session, kind: AnalysisKind) -> Result<()> {
    let available = session.credits().ok_or(CarbonError::NotSignedIn)?;
    if available < kind.cost() {
        return Err(CarbonError::InsufficientCredits {
            required: kind.cost(),
            available,
        }
        .into());
    }
    Ok(())
}

fn charge_session(
    session: &mut Session,
    store: &mut JsonFileStore,
    kind: AnalysisKind,
) -> Result<()> {
    let remaining = session.charge(kind)?;
    session.save(store)?;
    info!("Charged {} credits, {} left", kind.cost(), remaining);
    Ok(())
}

fn handle_batch(args: BatchArgs) -> Result<()> {
    let options = resolve_options(&args.engine)?;
    let t_compute = Instant::now();
    let rows: Vec<(PathBuf, EmissionReport)> = args
        .inputs
        .par_iter()
        .enumerate()
        .map(|(idx, path)| -> Result<(PathBuf, EmissionReport)> {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let analysis = WebsiteAnalysis::from_json(&text)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            // Per-file seeds keep batch output independent of scheduling.
            let report = match args.engine.seed {
                Some(seed) => estimate(
                    &analysis.to_input(),
                    &options,
                    &mut RngSource::seeded(seed.wrapping_add(idx as u64)),
                )?,
                None => estimate(&analysis.to_input(), &options, &mut RngSource::thread())?,
            };
            Ok((path.clone(), report))
        })
        .collect::<Result<Vec<_>>>()?;

    let placeholders = rows.iter().filter(|(_, r)| r.is_placeholder).count();
    info!(
        "Estimated {} payloads in {:.1} ms ({} placeholders)",
        rows.len(),
        t_compute.elapsed().as_secs_f64() * 1000.0,
        placeholders
    );

    if args.output == Path::new("-") {
        let stdout = io::stdout();
        let mut writer = csv::Writer::from_writer(stdout.lock());
        write_report_rows(&rows, &mut writer)
    } else {
        let file = File::create(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        write_report_rows(&rows, &mut writer)?;
        info!("Wrote report CSV: {}", args.output.display());
        Ok(())
    }
}

fn write_report_rows<W: Write>(
    rows: &[(PathBuf, EmissionReport)],
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    writer.write_record([
        "source",
        "co2_per_page_g",
        "grade",
        "cleaner_than_pct",
        "annual_co2_kg",
        "monthly_views",
        "provenance",
        "rule_id",
    ])?;
    for (path, report) in rows {
        writer.write_record([
            path.display().to_string(),
            format!("{:.6}", report.co2_per_page_grams),
            report.grade.to_string(),
            report.cleaner_than_percent.to_string(),
            format!("{:.2}", report.annual_co2_kg),
            report.assumed_monthly_views.to_string(),
            report.provenance.as_str().to_string(),
            report.rule_id.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn handle_last(args: OutputArgs, cache_dir: &Path) -> Result<()> {
    let store = JsonFileStore::open(cache_dir)?;
    let Some(stored) = StoredAnalysis::load(&store)? else {
        return Err(anyhow!("no analysis stored in {}", cache_dir.display()));
    };
    match args.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&stored)?);
            Ok(())
        }
        OutputFormat::Text => {
            let local = stored.analyzed_at.with_timezone(&Local);
            println!("Analyzed at: {}", local.format("%Y-%m-%d %H:%M"));
            print_report(&stored.report, stored.url.as_deref(), OutputFormat::Text)
        }
    }
}

fn handle_findings(args: FindingsArgs, cache_dir: &Path) -> Result<()> {
    let text = read_input(&args.input)?;
    let report = parse_findings(&text)
        .with_context(|| format!("failed to parse {}", args.input.display()))?;

    if args.charge {
        let mut store = JsonFileStore::open(cache_dir)?;
        let mut session = Session::restore(&mut store)?;
        charge_session(&mut session, &mut store, AnalysisKind::Repository)?;
    }

    for (index, err) in &report.rejected {
        warn!("Rejected finding #{index}: {err}");
    }

    match args.output.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            if let Some(repo) = report.repo.as_deref() {
                println!("Repository: {repo}");
            }
            if let Some(count) = report.file_count {
                println!("Files scanned: {count}");
            }
            println!(
                "Findings: {} ({} rejected)",
                report.findings.len(),
                report.rejected.len()
            );
            for (file, findings) in report.by_file() {
                println!("\n{file}");
                for finding in findings {
                    let title = finding
                        .problem
                        .as_deref()
                        .unwrap_or(finding.problem_description.as_str());
                    println!("  - {title}");
                    if !finding.optimization.is_empty() {
                        println!("    fix: {}", finding.optimization);
                    }
                }
            }
        }
    }
    Ok(())
}

fn handle_rules() -> Result<()> {
    for rule in list_normalization_rules() {
        println!("{:<32} {:<30} {}", rule.id, rule.name, rule.description);
    }
    Ok(())
}

fn handle_session(action: SessionAction, cache_dir: &Path) -> Result<()> {
    let mut store = JsonFileStore::open(cache_dir)?;
    let mut session = Session::restore(&mut store)?;
    match action {
        SessionAction::SignIn { email, admin } => {
            let role = if admin { Role::Admin } else { Role::User };
            session.sign_in(&email, role)?;
            session.save(&mut store)?;
        }
        SessionAction::Status => {}
        SessionAction::AddCredits { amount } => {
            session.add_credits(amount)?;
            session.save(&mut store)?;
        }
        SessionAction::Purchase { credits } => {
            let package = CreditPackage::find(credits)?;
            session.purchase(package)?;
            session.save(&mut store)?;
            println!(
                "Purchased {} credits for ${:.2}",
                package.credits,
                package.price_cents as f64 / 100.0
            );
        }
        SessionAction::Packages => {
            for package in CREDIT_PACKAGES.iter() {
                println!(
                    "{:>5} credits  ${:>6.2}  (${:.3}/credit)",
                    package.credits,
                    package.price_cents as f64 / 100.0,
                    package.price_per_credit()
                );
            }
            return Ok(());
        }
        SessionAction::SignOut => {
            session.sign_out(&mut store)?;
            println!("Signed out");
            return Ok(());
        }
    }
    match session.user() {
        Some(user) => println!(
            "{} <{}> [{:?}] credits: {}",
            user.name, user.email, user.role, user.credits
        ),
        None => println!("Not signed in"),
    }
    Ok(())
}

fn print_report(report: &EmissionReport, url: Option<&str>, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Text => {
            print!("{}", render_text(report, url));
        }
    }
    Ok(())
}

fn render_text(report: &EmissionReport, url: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(url) = url {
        out.push_str(&format!("URL: {url}\n"));
    }
    out.push_str(&format!(
        "CO2 per page view: {}\n",
        format_co2(report.co2_per_page_grams)
    ));
    out.push_str(&format!("Grade: {}\n", report.grade));
    out.push_str(&format!(
        "Cleaner than: {}% of websites (baseline {} g)\n",
        report.cleaner_than_percent, report.global_average_g
    ));
    out.push_str(&format!(
        "Annual CO2: {} at {} views/month\n",
        format_annual_kg(report.annual_co2_kg),
        report.assumed_monthly_views
    ));
    if let Some(green) = report.green_hosted {
        let hosting = if green { "green energy" } else { "standard" };
        out.push_str(&format!("Hosting: {hosting}\n"));
    }
    if report.is_placeholder {
        out.push_str("Note: placeholder value, no measured or reported data\n");
    }
    out
}
