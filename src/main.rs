use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mailprep::{
    config::{Config, CountSource},
    handoff::{save_with_fallback, Saved, REMOVE_DELAY},
    history::{Ledger, State},
    jobs::{self, JobNumber, WeekCode},
    process::{
        counts::{
            count_files, reconcile, tally_sections, write_counts_report, CountFile, CountGroups,
        },
        lookup::merge_lookup_files,
        quotes::{fix_stray_quotes, restore_quote_backups, scan_for_stray_quotes},
    },
    prompt::{
        ask_job_number, ask_week_code, parse_column_selection, ConsolePrompter, Prompter,
    },
    staging::Staging,
    table::{read_table, ReadOptions, WriteOptions},
};
use rand::{rngs::StdRng, SeedableRng};
use regex::Regex;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "mailprep", version, about = "Weekly direct-mail job preparation")]
struct Cli {
    /// YAML config; the built-in RAC layout when omitted.
    #[arg(long, global = true, env = "MAILPREP_CONFIG")]
    config: Option<PathBuf>,

    /// Never prompt; missing answers are errors and confirmations pass.
    #[arg(long, short = 'y', global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Unpack the weekly ZIP drop and prepare every job's INPUT folder.
    Intake {
        #[arg(long)]
        week: Option<String>,
        /// Run even if the ledger says this week is done.
        #[arg(long)]
        force: bool,
    },
    /// Split processed files into buckets and draw proof samples.
    Proofs {
        #[arg(long)]
        week: Option<String>,
        /// Only this job.
        #[arg(long)]
        job: Option<String>,
        /// Seed the sampler for a reproducible proof.
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        force: bool,
    },
    /// Add break marks to a presorted DP Marketing list and hand it off.
    BreakMark {
        input: PathBuf,
        /// Names the handed-off `<job> DP Marketing_WBREAK.csv`.
        #[arg(long)]
        job_number: Option<JobNumber>,
        /// Write here instead of handing off.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Tray column to try before the configured ones.
        #[arg(long)]
        tray_column: Option<String>,
    },
    /// Find, fix or restore stray double quotes.
    Quotes {
        #[command(subcommand)]
        action: QuotesAction,
    },
    /// Reconcile version counts between job inputs and outputs.
    Counts,
    /// Archive the week, clear working folders and zip the proofs.
    PostProof {
        #[arg(long)]
        week: Option<String>,
        /// `JOB=12345`, repeatable.
        #[arg(long = "job-number", value_parser = parse_job_number_arg)]
        job_numbers: Vec<(String, JobNumber)>,
        #[arg(long)]
        job: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Copy fields from an original list into a processed file by ID.
    Merge {
        final_file: PathBuf,
        original: PathBuf,
        /// Fields to copy; asked for when omitted.
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
    },
    /// Delete the files left in every job's INPUT folder.
    CleanInputs,
    /// Print the effective configuration as YAML.
    ShowConfig,
}

#[derive(Subcommand, Debug)]
enum QuotesAction {
    Scan,
    Fix,
    Restore,
}

fn parse_job_number_arg(s: &str) -> Result<(String, JobNumber), String> {
    let (job, num) = s
        .split_once('=')
        .ok_or_else(|| format!("expected JOB=NUMBER, got `{s}`"))?;
    let num = num.parse::<JobNumber>().map_err(|e| e.to_string())?;
    Ok((job.trim().to_ascii_uppercase(), num))
}

struct Ctx {
    config: Config,
    yes: bool,
    prompter: ConsolePrompter,
}

impl Ctx {
    fn week(&mut self, given: Option<&str>) -> Result<WeekCode> {
        match given {
            Some(w) => Ok(w.parse()?),
            None if self.yes => bail!("--week is required with --yes"),
            None => ask_week_code(&mut self.prompter),
        }
    }

    fn confirm(&mut self, question: &str) -> Result<bool> {
        if self.yes {
            return Ok(true);
        }
        self.prompter.confirm(question)
    }

    fn ledger(&self) -> Result<Ledger> {
        Ledger::new(self.config.ledger_path())
    }
}

/// Run `work` inside a staging area and record the outcome. Returns `None`
/// when the ledger shows the step already committed.
fn run_step<T>(
    ctx: &Ctx,
    ledger: &Ledger,
    job: &str,
    step: &str,
    force: bool,
    work: impl FnOnce(&mut Staging) -> Result<(T, usize)>,
) -> Result<Option<T>> {
    if !force && ledger.completed(step, job) {
        info!(job, step, "already committed; skipped (use --force to rerun)");
        return Ok(None);
    }
    ledger.record(job, step, State::Started, 0)?;
    let outcome = Staging::begin(&ctx.config.root).and_then(|mut staging| {
        let (value, rows) = work(&mut staging)?;
        debug!(job, step, changes = staging.pending(), "work staged");
        let applied = staging.commit()?;
        info!(job, step, applied, "committed");
        Ok((value, rows))
    });
    match outcome {
        Ok((value, rows)) => {
            ledger.record(job, step, State::Committed, rows)?;
            Ok(Some(value))
        }
        Err(e) => {
            if let Err(le) = ledger.record(job, step, State::RolledBack, 0) {
                warn!(error = %le, "could not record rollback");
            }
            Err(e)
        }
    }
}

fn intake(ctx: &mut Ctx, week: Option<&str>, force: bool) -> Result<()> {
    let week = ctx.week(week)?;
    let ledger = ctx.ledger()?;
    let step = format!("intake {}", week.as_str());
    let report = run_step(ctx, &ledger, "WEEKLY", &step, force, |staging| {
        let r = jobs::run_intake(&ctx.config, staging)?;
        let n = r.extracted;
        Ok((r, n))
    })?;
    if let Some(r) = report {
        for (job, n) in &r.routed {
            info!(job = %job, files = n, "routed");
        }
        for f in &r.unrouted {
            warn!(file = %f, "no job claims this file; left out");
        }
        info!(zips = r.zips, files = r.extracted, "intake done");
    }
    Ok(())
}

fn proofs(
    ctx: &mut Ctx,
    week: Option<&str>,
    only: Option<&str>,
    seed: Option<u64>,
    force: bool,
) -> Result<()> {
    let week = ctx.week(week)?;
    let ledger = ctx.ledger()?;
    let step = format!("proofs {}", week.as_str());
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_os_rng(),
    };
    let selected = match only {
        Some(name) => vec![ctx.config.job(name)?.clone()],
        None => ctx.config.jobs.clone(),
    };
    for job in &selected {
        let dir = ctx.config.job_dir(job);
        if job.proof_jobs.is_empty() {
            continue;
        }
        if !dir.is_dir() {
            warn!(job = %job.name, dir = %dir.display(), "working folder missing; skipped");
            continue;
        }
        for pj in &job.proof_jobs {
            let key = format!("{}/{}", job.name, pj.name);
            let report = run_step(ctx, &ledger, &key, &step, force, |staging| {
                let r = jobs::run_proof_job(pj, &dir, &ctx.config.proof, staging, &mut rng)?;
                let rows = r.total_rows();
                Ok((r, rows))
            })?;
            if let Some(r) = report {
                for b in &r.buckets {
                    info!(job = %key, bucket = %b.bucket, rows = b.rows, proof = b.proof_rows, "bucket");
                }
                if r.unmatched > 0 {
                    warn!(job = %key, rows = r.unmatched, "rows matched no bucket");
                }
            }
        }
    }
    Ok(())
}

fn break_mark(
    ctx: &mut Ctx,
    input: &Path,
    job_number: Option<JobNumber>,
    output: Option<&Path>,
    tray: Option<&str>,
) -> Result<()> {
    let mut spec = ctx.config.break_mark.clone();
    if let Some(t) = tray {
        spec.tray_columns.insert(0, t.to_string());
    }
    if let Some(dest) = output {
        let (table, groups) = jobs::break_mark::mark_file(input, &spec)?;
        let root = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let mut staging = Staging::begin(root)?;
        staging.write_table(&table, dest, &WriteOptions::quote_all())?;
        staging.commit()?;
        info!(groups, rows = table.len(), out = %dest.display(), "break marks written");
        return Ok(());
    }

    let job_number = match job_number {
        Some(n) => n,
        None if ctx.yes => bail!("--job-number is required with --yes"),
        None => ask_job_number(&mut ctx.prompter, "DP Marketing")?,
    };
    let name = jobs::break_mark_file_name(&job_number);
    let h = &ctx.config.handoff;
    let primary = h.primary.as_ref().map(|p| ctx.config.resolve(p));
    let fallback = ctx.config.resolve(&h.break_mark_fallback);
    let report = jobs::run_break_mark(input, &spec, &name, primary.as_deref(), &fallback)?;
    if matches!(report.saved, Saved::Fallback(_)) {
        warn!(file = %report.saved.path().display(), "share unavailable; move the file by hand");
    }
    Ok(())
}

fn quotes(ctx: &mut Ctx, action: &QuotesAction) -> Result<()> {
    let q = &ctx.config.quotes;
    let base = ctx.config.resolve(&q.base_dir);
    let backup = ctx.config.resolve(&q.backup_dir);
    match action {
        QuotesAction::Restore => {
            let restored = restore_quote_backups(&base, &backup)?;
            info!(files = restored.len(), "backups restored");
        }
        QuotesAction::Scan | QuotesAction::Fix => {
            let dirs: Vec<PathBuf> = q.scan_dirs.iter().map(|d| ctx.config.resolve(d)).collect();
            let found = scan_for_stray_quotes(&dirs, &q.exclude)?;
            for r in &found {
                warn!(file = %r.path.display(), lines = ?r.lines, "stray quotes");
            }
            if found.is_empty() {
                info!("no stray quotes found");
                return Ok(());
            }
            if matches!(action, QuotesAction::Fix)
                && ctx.confirm(&format!("Strip stray quotes from {} files?", found.len()))?
            {
                let files: Vec<PathBuf> = found.into_iter().map(|r| r.path).collect();
                let fixed = fix_stray_quotes(&files, &base, &backup)?;
                info!(files = fixed, backup = %backup.display(), "stray quotes removed");
            }
        }
    }
    Ok(())
}

fn count_sources(config: &Config, sources: &[CountSource]) -> Result<Vec<CountFile>> {
    let mut files = Vec::new();
    for src in sources {
        let job = config.job(&src.job)?;
        let dir = config.job_dir(job).join(&src.folder);
        let pattern = format!("{}/{}", dir.display(), src.pattern);
        for path in glob::glob(&pattern)
            .with_context(|| format!("invalid count pattern {pattern}"))?
            .filter_map(Result::ok)
        {
            files.push(CountFile {
                path,
                column: src.column.clone(),
            });
        }
    }
    Ok(files)
}

fn counts(ctx: &Ctx) -> Result<()> {
    let c = &ctx.config.counts;
    let pattern = Regex::new(&c.version_pattern).context("invalid version pattern")?;
    let groups = CountGroups::compile(&c.groups)?;
    let input = count_files(&count_sources(&ctx.config, &c.inputs)?, &pattern)?;
    let output = count_files(&count_sources(&ctx.config, &c.outputs)?, &pattern)?;
    let rows = reconcile(&input, &output, &groups);
    for r in rows.iter().filter(|r| r.is_error()) {
        error!(group = %r.group, input = r.input, output = r.output, "more output than input");
    }
    let sections = tally_sections(&c.sections, &output);
    let report = write_counts_report(&ctx.config.resolve(&c.report_dir), &rows, &sections)?;
    let h = &ctx.config.handoff;
    let primary = h.primary.as_ref().map(|p| ctx.config.resolve(p));
    let saved = save_with_fallback(
        primary.as_deref(),
        &ctx.config.resolve(&h.fallback),
        "COUNTS.csv",
        |target| {
            fs::copy(&report, target)
                .with_context(|| format!("copying {}", report.display()))?;
            Ok(())
        },
    )?;
    info!(report = %report.display(), copy = %saved.path().display(), groups = rows.len(), "counts written");
    Ok(())
}

fn post_proof(
    ctx: &mut Ctx,
    week: Option<&str>,
    given: &[(String, JobNumber)],
    only: Option<&str>,
    force: bool,
) -> Result<()> {
    let week = ctx.week(week)?;
    let ledger = ctx.ledger()?;
    let step = format!("post-proof {}", week.as_str());
    let given: HashMap<&str, &JobNumber> = given.iter().map(|(j, n)| (j.as_str(), n)).collect();
    let selected = match only {
        Some(name) => vec![ctx.config.job(name)?.clone()],
        None => ctx.config.jobs.clone(),
    };
    for job in &selected {
        if !ctx.config.job_dir(job).is_dir() {
            warn!(job = %job.name, "working folder missing; skipped");
            continue;
        }
        if !force && ledger.completed(&step, &job.name) {
            info!(job = %job.name, "already archived this week; skipped");
            continue;
        }
        let number = match given.get(job.name.to_ascii_uppercase().as_str()) {
            Some(n) => (*n).clone(),
            None if ctx.yes => bail!("--job-number {}=NUMBER is required with --yes", job.name),
            None => ask_job_number(&mut ctx.prompter, &job.name)?,
        };
        if !ctx.confirm(&format!(
            "Archive and clear {} for week {}?",
            job.name,
            week.as_str()
        ))? {
            info!(job = %job.name, "skipped by operator");
            continue;
        }
        let report = run_step(ctx, &ledger, &job.name, &step, true, |staging| {
            let r = jobs::run_post_proof(&ctx.config, job, &number, &week, staging)?;
            let n = r.cleared;
            Ok((r, n))
        })?;
        let Some(r) = report else { continue };
        let h = &ctx.config.handoff;
        let primary = h.primary.as_ref().map(|p| ctx.config.resolve(p));
        let name = r
            .zip
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let saved = save_with_fallback(
            primary.as_deref(),
            &ctx.config.resolve(&h.fallback),
            &name,
            |target| {
                fs::copy(&r.zip, target)
                    .with_context(|| format!("copying {}", r.zip.display()))?;
                Ok(())
            },
        )?;
        info!(job = %r.job, archived = %r.archived_to.display(), zip = %saved.path().display(), "post-proof done");
    }
    Ok(())
}

fn merge(ctx: &mut Ctx, final_file: &Path, original: &Path, fields: Vec<String>) -> Result<()> {
    let fields = if !fields.is_empty() {
        fields
    } else if ctx.yes {
        bail!("--fields is required with --yes");
    } else {
        let orig = read_table(original, &ReadOptions::default())?;
        let choices: Vec<&String> = orig.headers.iter().skip(1).collect();
        for (i, h) in choices.iter().enumerate() {
            println!("{:>3}. {h}", i + 1);
        }
        let answer = ctx.prompter.ask("Fields to copy (e.g. 1,3 or 2-4 or ALL)")?;
        parse_column_selection(&answer, choices.len())?
            .into_iter()
            .map(|i| choices[i].clone())
            .collect()
    };
    let (out, stats) = merge_lookup_files(final_file, original, &fields)?;
    info!(out = %out.display(), matched = stats.matched, total = stats.total, "merge done");
    Ok(())
}

fn clean_inputs(ctx: &mut Ctx) -> Result<()> {
    let dirs = ctx.config.input_dirs();
    if !ctx.confirm(&format!("Delete every file in {} INPUT folders?", dirs.len()))? {
        return Ok(());
    }
    let report = jobs::clean_input_folders(&dirs, REMOVE_DELAY);
    info!(deleted = report.deleted.len(), "input folders cleaned");
    if !report.is_success() {
        for (path, why) in &report.failures {
            error!(file = %path.display(), error = %why, "not deleted");
        }
        bail!(
            "{} files could not be deleted, {} folders missing",
            report.failures.len(),
            report.missing_dirs.len()
        );
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let mut ctx = Ctx {
        config,
        yes: cli.yes,
        prompter: ConsolePrompter,
    };
    match &cli.command {
        Command::Intake { week, force } => intake(&mut ctx, week.as_deref(), *force),
        Command::Proofs {
            week,
            job,
            seed,
            force,
        } => proofs(&mut ctx, week.as_deref(), job.as_deref(), *seed, *force),
        Command::BreakMark {
            input,
            job_number,
            output,
            tray_column,
        } => break_mark(
            &mut ctx,
            input,
            job_number.clone(),
            output.as_deref(),
            tray_column.as_deref(),
        ),
        Command::Quotes { action } => quotes(&mut ctx, action),
        Command::Counts => counts(&ctx),
        Command::PostProof {
            week,
            job_numbers,
            job,
            force,
        } => post_proof(&mut ctx, week.as_deref(), job_numbers, job.as_deref(), *force),
        Command::Merge {
            final_file,
            original,
            fields,
        } => merge(&mut ctx, final_file, original, fields.clone()),
        Command::CleanInputs => clean_inputs(&mut ctx),
        Command::ShowConfig => {
            print!("{}", ctx.config.to_yaml()?);
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    // ─── logging ─────────────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    std::panic::set_hook(Box::new(|info| {
        eprintln!("panic: {:?}", info);
    }));

    let cli = Cli::parse();
    info!(command = ?cli.command, "startup");
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
