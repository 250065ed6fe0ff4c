//! scenefix - repair and render generated animation scenes
//!
//! ## Commands
//!
//! - `classify`: structured view of a traceback
//! - `positions`: placement-call table of a scene file
//! - `apply-feedback`: rewrite placement calls from critique feedback
//! - `check`: syntax gate, optionally followed by a dry run
//! - `repair`: run the repair orchestrator on one failing section
//! - `render`: render a storyboard end to end

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use uuid::Uuid;

use scenefix_core::obs::SectionSpan;
use scenefix_core::positions::SkippedFeedback;
use scenefix_core::{
    apply_feedback, brief_error, check_syntax, classify_error, extract_positions,
    output_dir_for, render_position_table, safe_topic_name, scene_class_name,
    write_repair_artifact, CandidateValidator, ErrorBrief, ErrorDescriptor, LoopSettings,
    ModelClient, OpenAiCompatClient, OpenAiCompatCritic, RenderSummary, RepairOrchestrator,
    RepairOutcome, RunConfig, Section, SectionPipeline, SectionRenderLoop, Storyboard, TrackedModel,
    UsageSummary, UsageTracker,
};
use scenefix_exec::{python_validator, FfmpegConcatenator, ManimRenderer};

#[derive(Parser)]
#[command(name = "scenefix")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Error-driven repair and rendering of generated animation scenes", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a render or dry-run error
    Classify {
        /// File holding the raw error text (`-` for stdin)
        #[arg(default_value = "-")]
        error: PathBuf,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// List the placement calls of a scene file
    Positions {
        /// Scene source file
        source: PathBuf,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Apply line-addressed placement feedback to a scene file
    ApplyFeedback {
        /// Scene source file
        source: PathBuf,

        /// Feedback file, one item per line
        #[arg(short, long)]
        feedback: Option<PathBuf>,

        /// Feedback item (repeatable)
        #[arg(short, long = "item")]
        items: Vec<String>,

        /// Write the edited source here instead of stdout
        #[arg(short, long, conflicts_with = "in_place")]
        output: Option<PathBuf>,

        /// Overwrite the source file
        #[arg(long)]
        in_place: bool,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Check a scene file with the syntax gate
    Check {
        /// Scene source file
        source: PathBuf,

        /// Also import and instantiate the scene in a Python subprocess
        #[arg(long)]
        dry_run: bool,

        /// Scene class (derived from the file name if omitted)
        #[arg(long)]
        scene: Option<String>,

        /// Run configuration (TOML)
        #[arg(short, long, env = "SCENEFIX_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Repair a failing section with the model
    Repair {
        /// Scene source file
        source: PathBuf,

        /// File holding the error the source failed with (`-` for stdin)
        #[arg(short, long)]
        error: PathBuf,

        /// Section id (derived from the file name if omitted)
        #[arg(long)]
        section_id: Option<String>,

        /// Scene class (derived from the section id if omitted)
        #[arg(long)]
        scene: Option<String>,

        /// Write the repaired source here instead of overwriting the input
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory for the repair log artifact
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Run configuration (TOML)
        #[arg(short, long, env = "SCENEFIX_CONFIG")]
        config: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Render every section of a storyboard and concatenate the result
    Render {
        /// Storyboard JSON file
        storyboard: PathBuf,

        /// Base output directory
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,

        /// Knowledge-point index used in the output directory name
        #[arg(long, default_value_t = 0)]
        index: usize,

        /// Restrict the run to these section ids (repeatable)
        #[arg(short, long = "section")]
        sections: Vec<String>,

        /// Only generate code, do not render
        #[arg(long)]
        codegen_only: bool,

        /// Run configuration (TOML)
        #[arg(short, long, env = "SCENEFIX_CONFIG")]
        config: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    scenefix_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Classify { error, format } => cmd_classify(&error, format),
        Commands::Positions { source, format } => cmd_positions(&source, format),
        Commands::ApplyFeedback {
            source,
            feedback,
            items,
            output,
            in_place,
            format,
        } => {
            let target = if in_place { Some(source.clone()) } else { output };
            cmd_apply_feedback(&source, feedback.as_deref(), items, target.as_deref(), format)
        }
        Commands::Check {
            source,
            dry_run,
            scene,
            config,
        } => cmd_check(&source, dry_run, scene, config.as_deref()).await,
        Commands::Repair {
            source,
            error,
            section_id,
            scene,
            output,
            log_dir,
            config,
            format,
        } => {
            cmd_repair(RepairArgs {
                source,
                error,
                section_id,
                scene,
                output,
                log_dir,
                config,
                format,
            })
            .await
        }
        Commands::Render {
            storyboard,
            output_dir,
            index,
            sections,
            codegen_only,
            config,
            format,
        } => {
            cmd_render(
                &storyboard,
                &output_dir,
                index,
                &sections,
                codegen_only,
                config.as_deref(),
                format,
            )
            .await
        }
    }
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))
}

/// Serialized name of a unit enum value (`name`, `line`, ...).
fn label<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "-".to_string())
}

fn section_id_for(source: &Path) -> String {
    source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("section")
        .to_string()
}

fn work_dir_for(source: &Path) -> PathBuf {
    match source.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// classify
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct Classification {
    descriptor: ErrorDescriptor,
    brief: ErrorBrief,
}

fn classify(raw: &str) -> Classification {
    Classification {
        descriptor: classify_error(raw),
        brief: brief_error(raw),
    }
}

fn cmd_classify(error: &Path, format: OutputFormat) -> Result<()> {
    let raw = read_input(error)?;
    let report = classify(&raw);
    if format == OutputFormat::Json {
        return print_json(&report);
    }

    let d = &report.descriptor;
    println!("kind:     {}", label(&d.kind));
    println!("tag:      {}", d.tag.as_deref().unwrap_or("-"));
    match d.line {
        Some(line) => println!("line:     {}", line),
        None => println!("line:     -"),
    }
    println!("scope:    {}", label(&d.scope));
    println!("category: {}", label(&report.brief.category));
    if let Some(hint) = &d.hint {
        println!("hint:     {}", hint);
    }
    if !report.brief.suggestions.is_empty() {
        println!("suggestions:");
        for s in &report.brief.suggestions {
            println!("  - {}", s);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// positions / apply-feedback
// ---------------------------------------------------------------------------

fn cmd_positions(source: &Path, format: OutputFormat) -> Result<()> {
    let code = read_input(source)?;
    let directives = extract_positions(&code);
    match format {
        OutputFormat::Json => print_json(&directives),
        OutputFormat::Text => {
            if directives.is_empty() {
                println!("No placement calls found.");
            } else {
                println!("{}", render_position_table(&directives));
            }
            Ok(())
        }
    }
}

fn feedback_items(feedback: Option<&Path>, mut items: Vec<String>) -> Result<Vec<String>> {
    if let Some(path) = feedback {
        let text = read_input(path)?;
        items.extend(
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string),
        );
    }
    Ok(items)
}

fn report_skipped(skipped: &[SkippedFeedback]) {
    for s in skipped {
        warn!(reason = %label(&s.reason), item = %s.item, "feedback item skipped");
    }
}

fn cmd_apply_feedback(
    source: &Path,
    feedback: Option<&Path>,
    items: Vec<String>,
    target: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let items = feedback_items(feedback, items)?;
    if items.is_empty() {
        bail!("no feedback given; use --feedback or --item");
    }
    let code = read_input(source)?;
    let edits = apply_feedback(&code, &items);
    report_skipped(&edits.skipped);

    if let Some(path) = target {
        if !edits.is_empty() {
            std::fs::write(path, &edits.source)
                .with_context(|| format!("Failed to write {:?}", path))?;
        }
    }

    match (format, target) {
        (OutputFormat::Json, _) => print_json(&edits),
        (OutputFormat::Text, Some(path)) => {
            println!(
                "Applied {} edit(s), skipped {} item(s)",
                edits.applied.len(),
                edits.skipped.len()
            );
            for edit in &edits.applied {
                println!("  line {}: {}", edit.line, edit.call);
            }
            if !edits.is_empty() {
                println!("Written to {:?}", path);
            }
            Ok(())
        }
        (OutputFormat::Text, None) => {
            print!("{}", edits.source);
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

async fn cmd_check(
    source: &Path,
    dry_run: bool,
    scene: Option<String>,
    config: Option<&Path>,
) -> Result<()> {
    let code = read_input(source)?;
    let syntax = check_syntax(&code);
    if !syntax.valid {
        bail!("{}", syntax.message);
    }
    println!("Syntax: OK");
    if !dry_run {
        return Ok(());
    }

    let config = RunConfig::load(config).context("Failed to load configuration")?;
    let section_id = section_id_for(source);
    let scene = scene.unwrap_or_else(|| scene_class_name(&section_id));
    let validator = python_validator(
        &config.python_bin,
        work_dir_for(source),
        config.dry_run_timeout(),
    );
    let report = validator.validate(&section_id, &code, &scene).await;
    if !report.is_valid() {
        bail!("dry run failed for {}:\n{}", scene, report.message);
    }
    println!("Dry run: OK ({})", scene);
    Ok(())
}

// ---------------------------------------------------------------------------
// repair
// ---------------------------------------------------------------------------

struct RepairArgs {
    source: PathBuf,
    error: PathBuf,
    section_id: Option<String>,
    scene: Option<String>,
    output: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    format: OutputFormat,
}

/// A model client for `model` on the configured endpoint.
fn stage_client(config: &RunConfig, model: &str) -> Result<OpenAiCompatClient> {
    OpenAiCompatClient::new(
        &config.api_base,
        config.api_key.clone().unwrap_or_default(),
        model,
        config.retry_policy(),
    )
    .with_context(|| format!("Failed to configure model client for {}", model))
}

fn tracked(client: OpenAiCompatClient, tracker: &Arc<UsageTracker>) -> Arc<dyn ModelClient> {
    Arc::new(TrackedModel::new(Arc::new(client), Arc::clone(tracker)))
}

async fn cmd_repair(args: RepairArgs) -> Result<()> {
    let config = RunConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let code = read_input(&args.source)?;
    let raw_error = read_input(&args.error)?;
    let section_id = args
        .section_id
        .unwrap_or_else(|| section_id_for(&args.source));
    let scene = args.scene.unwrap_or_else(|| scene_class_name(&section_id));

    let _span = SectionSpan::enter(&section_id);
    let tracker = Arc::new(UsageTracker::new());
    let model = tracked(stage_client(&config, &config.models.repair)?, &tracker);
    let validator = python_validator(
        &config.python_bin,
        work_dir_for(&args.source),
        config.dry_run_timeout(),
    );
    let orchestrator = RepairOrchestrator::new(model, Arc::new(validator), config.repair_policy());

    let report = orchestrator
        .repair(&section_id, &scene, &code, &raw_error)
        .await;

    if let Some(dir) = &args.log_dir {
        let path = write_repair_artifact(&report.log, dir)
            .with_context(|| format!("Failed to write repair log under {:?}", dir))?;
        info!(path = %path.display(), "repair log written");
    }

    if let Some(fixed) = &report.fixed {
        let target = args.output.as_deref().unwrap_or(&args.source);
        std::fs::write(target, fixed).with_context(|| format!("Failed to write {:?}", target))?;
        info!(path = %target.display(), "repaired source written");
    }

    if args.format == OutputFormat::Json {
        print_json(&report.log)?;
    } else {
        for attempt in &report.log.attempts {
            println!(
                "  #{} tier {:<5} {:<10} {}",
                attempt.attempt,
                attempt.tier.label(),
                label(&attempt.scope),
                attempt.outcome.as_str()
            );
        }
        match &report.log.outcome {
            RepairOutcome::Fixed { tier } => {
                println!("Fixed by tier {} after {} attempt(s)", tier.label(), report.log.attempts_used)
            }
            RepairOutcome::Exhausted => {
                println!("Not fixed after {} attempt(s)", report.log.attempts_used)
            }
        }
        let usage = tracker.snapshot();
        println!("Model calls: {} ({} tokens)", usage.calls, usage.totals.total_tokens);
    }

    if report.fixed.is_none() {
        bail!("repair budget exhausted for {}", section_id);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// render
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct RenderReport {
    run_id: Uuid,
    output_dir: PathBuf,
    summary: RenderSummary,
    usage: UsageSummary,
}

async fn cmd_render(
    storyboard: &Path,
    base: &Path,
    index: usize,
    only: &[String],
    codegen_only: bool,
    config: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let config = RunConfig::load(config).context("Failed to load configuration")?;
    let storyboard = Storyboard::load(storyboard)
        .with_context(|| format!("Failed to load storyboard {:?}", storyboard))?;
    let sections = select_sections(&storyboard, only)?;
    let topic = storyboard
        .topic
        .clone()
        .unwrap_or_else(|| "untitled".to_string());
    let out_dir = output_dir_for(index, &topic, base);
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("Failed to create {:?}", out_dir))?;

    let run_id = Uuid::new_v4();
    info!(run_id = %run_id, topic = %topic, sections = sections.len(), "render run started");

    let tracker = Arc::new(UsageTracker::new());
    let code_model = tracked(stage_client(&config, &config.models.code)?, &tracker);
    let repair_model = tracked(stage_client(&config, &config.models.repair)?, &tracker);
    let validator = python_validator(&config.python_bin, &out_dir, config.dry_run_timeout());
    let repairer = Arc::new(RepairOrchestrator::new(
        repair_model,
        Arc::new(validator),
        config.repair_policy(),
    ));

    let mut settings = LoopSettings::from_config(&config);
    settings.repair_log_dir = Some(out_dir.join("repair_logs"));
    let renderer = Arc::new(ManimRenderer::new(&config.manim_bin, config.render_timeout()));
    let mut render_loop =
        SectionRenderLoop::new(&out_dir, code_model, repairer, renderer, settings);
    if config.use_feedback {
        let critic = OpenAiCompatCritic::new(
            stage_client(&config, &config.models.critique)?,
            config.max_code_token_length,
        )
        .with_tracker(Arc::clone(&tracker));
        render_loop = render_loop.with_critic(Arc::new(critic));
    }

    let pipeline = SectionPipeline::new(
        Arc::new(render_loop),
        config.max_workers,
        config.codegen_workers,
    )
    .with_concatenator(Arc::new(FfmpegConcatenator::new(
        &config.ffmpeg_bin,
        config.render_timeout(),
    )));

    if codegen_only {
        let with_code = pipeline.generate_codes(&sections).await;
        println!(
            "Generated code for {}/{} section(s) in {:?}",
            with_code,
            sections.len(),
            out_dir
        );
        return Ok(());
    }

    let final_video = out_dir.join(format!("{}.mp4", safe_topic_name(&topic)));
    let summary = pipeline
        .render_all(sections, Some(&final_video))
        .await;
    let report = RenderReport {
        run_id,
        output_dir: out_dir,
        summary,
        usage: tracker.snapshot(),
    };

    if format == OutputFormat::Json {
        print_json(&report)?;
    } else {
        print_render_report(&report);
    }

    if report.summary.succeeded == 0 {
        bail!("no section rendered");
    }
    Ok(())
}

/// All sections, or the requested ones in storyboard order.
fn select_sections(storyboard: &Storyboard, only: &[String]) -> Result<Vec<Section>> {
    if only.is_empty() {
        return Ok(storyboard.sections.clone());
    }
    for id in only {
        storyboard.section(id)?;
    }
    Ok(storyboard
        .sections
        .iter()
        .filter(|s| only.contains(&s.id))
        .cloned()
        .collect())
}

fn print_render_report(report: &RenderReport) {
    println!("Run {} -> {:?}", report.run_id, report.output_dir);
    for r in &report.summary.results {
        let status = if r.success { "ok" } else { "FAILED" };
        println!(
            "  {:<12} {:<6} renders={} repairs={} critique={} {}ms",
            r.section_id, status, r.renders, r.repairs, r.critique_rounds, r.duration_ms
        );
    }
    println!(
        "Sections: {}/{} ({:.0}%)",
        report.summary.succeeded,
        report.summary.results.len(),
        report.summary.success_rate * 100.0
    );
    match &report.summary.final_video {
        Some(path) => println!("Final video: {:?}", path),
        None => println!("Final video: not produced"),
    }
    println!(
        "Model calls: {} ({} prompt / {} completion tokens)",
        report.usage.calls, report.usage.totals.prompt_tokens, report.usage.totals.completion_tokens
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_repair_arguments() {
        let cli = Cli::try_parse_from([
            "scenefix",
            "--verbose",
            "repair",
            "out/section_2.py",
            "--error",
            "err.txt",
            "--log-dir",
            "logs",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Repair {
                source,
                error,
                section_id,
                log_dir,
                format,
                ..
            } => {
                assert_eq!(source, PathBuf::from("out/section_2.py"));
                assert_eq!(error, PathBuf::from("err.txt"));
                assert!(section_id.is_none());
                assert_eq!(log_dir, Some(PathBuf::from("logs")));
                assert_eq!(format, OutputFormat::Text);
            }
            _ => panic!("expected repair"),
        }
    }

    #[test]
    fn test_in_place_conflicts_with_output() {
        let parsed = Cli::try_parse_from([
            "scenefix",
            "apply-feedback",
            "a.py",
            "--item",
            "x",
            "--in-place",
            "--output",
            "b.py",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_section_defaults_from_file_name() {
        assert_eq!(section_id_for(Path::new("out/3-Topic/section_4.py")), "section_4");
        assert_eq!(work_dir_for(Path::new("section_4.py")), PathBuf::from("."));
        assert_eq!(
            work_dir_for(Path::new("out/section_4.py")),
            PathBuf::from("out")
        );
    }

    #[test]
    fn test_classify_report_labels() {
        let report = classify("Traceback (most recent call last):\n  File \"section_1.py\", line 7, in construct\nNameError: name 'Circl' is not defined");
        assert_eq!(label(&report.descriptor.kind), "name");
        assert_eq!(report.descriptor.line, Some(7));
        assert_eq!(report.brief.tag, "NameError");
    }

    #[test]
    fn test_feedback_items_merge_file_and_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feedback.txt");
        std::fs::write(&path, "Solution: Line 3: self.place_at_grid(t, 'B2')\n\n").unwrap();
        let items = feedback_items(Some(&path), vec!["first".to_string()]).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], "first");
        assert!(items[1].starts_with("Solution: Line 3"));
    }

    #[test]
    fn test_apply_feedback_writes_target() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("section_1.py");
        std::fs::write(
            &source,
            "class Section1Scene(TeachingScene):\n    def construct(self):\n        self.place_at_grid(t, 'A1')\n",
        )
        .unwrap();
        let target = dir.path().join("edited.py");
        cmd_apply_feedback(
            &source,
            None,
            vec!["[LAYOUT] Problem: overlaps the title; Solution: Line 3: self.place_at_grid(t, 'C3')".to_string()],
            Some(&target),
            OutputFormat::Text,
        )
        .unwrap();
        let edited = std::fs::read_to_string(&target).unwrap();
        assert!(edited.contains("self.place_at_grid(t, 'C3')"));
        assert!(!edited.contains("'A1'"));
    }

    #[test]
    fn test_select_sections_keeps_storyboard_order() {
        let storyboard = Storyboard::from_json(
            r#"{"sections": [{"id": "a", "title": "A"}, {"id": "b", "title": "B"}, {"id": "c", "title": "C"}]}"#,
        )
        .unwrap();
        let picked = select_sections(&storyboard, &["c".to_string(), "a".to_string()]).unwrap();
        let ids: Vec<&str> = picked.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(select_sections(&storyboard, &[]).unwrap().len(), 3);
        assert!(select_sections(&storyboard, &["zz".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_check_rejects_broken_syntax() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("section_1.py");
        std::fs::write(&source, "class Section1Scene(Scene:\n    pass\n").unwrap();
        assert!(cmd_check(&source, false, None, None).await.is_err());
    }
}
