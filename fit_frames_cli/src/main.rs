use std::collections::BTreeMap;
use std::fs;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use fit_frames::decode::fit_value_to_f64;
use fit_frames::{
    classify, drive, plan_fields, prepare, Bounds, Field, FieldClass, FieldSet, Frame, Params,
    Prepared, Renderer,
};
use fitparser::de::from_bytes;
use fitparser::profile::MesgNum;
use fitparser::Value as FitValue;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Resample FIT activities into fixed-rate overlay frames", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the interpolated frame stream of each FIT file as CSV
    Frames(FramesArgs),
    /// Print ingestion and frame statistics as JSON
    Summary(SummaryArgs),
    /// Inspect FIT files for message kinds, record keys and timestamp steps
    Diagnose(DiagnoseArgs),
}

#[derive(Args, Debug)]
struct PipelineArgs {
    /// JSON config file; command-line flags override it
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Frames per second of activity time
    #[arg(long)]
    fps: Option<u32>,

    /// Time offset added to every timestamp (hours)
    #[arg(long, allow_negative_numbers = true)]
    offset: Option<f64>,

    /// Fields to carry (comma separated)
    #[arg(long, value_delimiter = ',')]
    fields: Option<Vec<String>>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct FramesArgs {
    /// FIT files to process
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output CSV path (`-` for stdout); only valid with a single input.
    /// Defaults to `<input>_frames.csv`.
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    /// Only emit the first NUM frames
    #[arg(short, long)]
    num: Option<usize>,

    /// Profile major stages with timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Parser, Debug)]
struct SummaryArgs {
    /// FIT files to summarize
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Parser, Debug)]
struct DiagnoseArgs {
    /// FIT files to inspect
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output report path
    #[arg(short, long, default_value = "fit_diagnostics.txt", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Frames(args) => args.pipeline.verbose,
        Command::Summary(args) => args.pipeline.verbose,
        Command::Diagnose(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Frames(args) => handle_frames(args),
        Command::Summary(args) => handle_summary(args),
        Command::Diagnose(args) => handle_diagnose(args),
    }
}

fn build_params(args: &PipelineArgs) -> Result<Params> {
    let mut params = match args.config.as_ref() {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            Params::from_json_str(&text)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => Params::default(),
    };
    if let Some(fps) = args.fps {
        params.frames_per_second = fps;
    }
    if let Some(hours) = args.offset {
        params.time_offset_s = (hours * 3600.0) as i64;
    }
    if let Some(fields) = args.fields.as_ref() {
        let fields: Vec<String> = fields
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if fields.is_empty() {
            return Err(anyhow!("--fields list was empty"));
        }
        params.fields = fields;
    }
    params.validate()?;
    Ok(params)
}

fn prepare_file(path: &Path, params: &Params) -> Result<Prepared> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let hint = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("fit");
    let prepared =
        prepare(&data, hint, params).with_context(|| format!("failed to parse {}", path.display()))?;
    if let Some(note) = truncation_note(path, &prepared) {
        warn!("{}", note);
    }
    Ok(prepared)
}

fn truncation_note(path: &Path, prepared: &Prepared) -> Option<String> {
    prepared.stop.as_ref().map(|stop| {
        format!(
            "{}: {}; keeping the {} samples read before it",
            path.display(),
            stop,
            prepared.sequence.raw_samples().len()
        )
    })
}

fn handle_frames(args: FramesArgs) -> Result<()> {
    let mut params = build_params(&args.pipeline)?;
    if args.num.is_some() {
        params.max_frames = args.num;
    }
    if args.output.is_some() && args.inputs.len() > 1 {
        return Err(anyhow!("--output can only be used with a single input"));
    }

    let t_total = Instant::now();
    let written = args
        .inputs
        .par_iter()
        .map(|path| -> Result<usize> {
            let out = match args.output.as_ref() {
                Some(out) => out.clone(),
                None => default_output_path(path),
            };
            write_frames(path, &out, &params, args.profile)
        })
        .collect::<Result<Vec<_>>>()?;

    if args.profile || args.pipeline.verbose {
        info!(
            "Frames stage: {:.1} ms ({} files, {} frames)",
            t_total.elapsed().as_secs_f64() * 1000.0,
            written.len(),
            written.iter().sum::<usize>()
        );
    }
    Ok(())
}

fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("activity");
    input.with_file_name(format!("{}_frames.csv", stem))
}

fn write_frames(input: &Path, output: &Path, params: &Params, profile: bool) -> Result<usize> {
    let writer: Box<dyn Write> = if output.as_os_str() == "-" {
        Box::new(io::stdout().lock())
    } else {
        let file = File::create(output)
            .with_context(|| format!("failed to create {}", output.display()))?;
        Box::new(BufWriter::new(file))
    };
    let mut sink = CsvFrameSink::new(writer, &params.field_set()?)?;
    let planned = params.with_fields(&plan_fields(&[&sink as &dyn Renderer]));

    let t_prepare = Instant::now();
    let prepared = prepare_file(input, &planned)?;
    if profile {
        info!(
            "{}: prepare stage {:.1} ms",
            input.display(),
            t_prepare.elapsed().as_secs_f64() * 1000.0
        );
    }

    let t_write = Instant::now();
    let total = prepared.sequence.frame_count();
    let driven = drive(prepared.sequence, &mut [&mut sink], params.max_frames);
    let rows = sink
        .finish()
        .with_context(|| format!("failed to write {}", output.display()))?;
    debug!(driven, rows, "frame loop done");

    if profile {
        info!(
            "{}: write stage {:.1} ms",
            input.display(),
            t_write.elapsed().as_secs_f64() * 1000.0
        );
    }
    if output.as_os_str() != "-" {
        info!(
            "Wrote {} of {} frames: {}",
            rows,
            total,
            output.display()
        );
    }
    Ok(rows)
}

/// Renderer that writes one CSV row per frame.
struct CsvFrameSink<W: Write> {
    writer: csv::Writer<W>,
    columns: Vec<Field>,
    rows: usize,
    error: Option<csv::Error>,
}

impl<W: Write> CsvFrameSink<W> {
    fn new(inner: W, fields: &FieldSet) -> Result<Self> {
        let columns: Vec<Field> = fields
            .iter()
            .filter(|f| !matches!(f, Field::Timestamp | Field::Interpolated))
            .collect();
        let mut writer = csv::Writer::from_writer(inner);
        let mut header = vec![
            "frame".to_string(),
            "time_s".to_string(),
            "timestamp".to_string(),
            "interpolated".to_string(),
        ];
        header.extend(columns.iter().map(|f| f.name().to_string()));
        writer.write_record(&header)?;
        Ok(Self {
            writer,
            columns,
            rows: 0,
            error: None,
        })
    }

    fn row(&self, frame: &Frame) -> Vec<String> {
        let mut row = Vec::with_capacity(self.columns.len() + 4);
        row.push(frame.index.to_string());
        row.push(format!("{:.3}", frame.time_s));
        row.push(
            frame
                .timestamp
                .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default(),
        );
        row.push(if frame.interpolated { "1" } else { "0" }.to_string());
        for field in &self.columns {
            let cell = match field {
                Field::Gears => frame.gears.clone().unwrap_or_default(),
                Field::Lap => {
                    if frame.lap {
                        "1".to_string()
                    } else {
                        String::new()
                    }
                }
                other => frame
                    .value(*other)
                    .map(|v| format!("{}", v))
                    .unwrap_or_default(),
            };
            row.push(cell);
        }
        row
    }

    fn finish(mut self) -> Result<usize> {
        if let Some(err) = self.error.take() {
            return Err(err.into());
        }
        self.writer.flush()?;
        Ok(self.rows)
    }
}

impl<W: Write> Renderer for CsvFrameSink<W> {
    fn required_fields(&self) -> FieldSet {
        let mut fields: FieldSet = self.columns.iter().copied().collect();
        fields.insert(Field::Timestamp);
        fields.insert(Field::Interpolated);
        fields
    }

    fn update(&mut self, frame: &Frame) {
        if self.error.is_some() {
            return;
        }
        let row = self.row(frame);
        match self.writer.write_record(&row) {
            Ok(()) => self.rows += 1,
            Err(err) => self.error = Some(err),
        }
    }
}

#[derive(Serialize)]
struct FileSummary {
    file: String,
    frames_per_second: u32,
    raw_samples: usize,
    accepted: usize,
    filled: usize,
    duplicates: usize,
    laps: usize,
    gear_changes: usize,
    frames: usize,
    nominal_frames: usize,
    duration_s: i64,
    truncated: Option<String>,
    elevation_bounds: Option<Bounds>,
    map_bounds: Option<Bounds>,
}

fn handle_summary(args: SummaryArgs) -> Result<()> {
    let params = build_params(&args.pipeline)?;
    let summaries = args
        .inputs
        .par_iter()
        .map(|path| -> Result<FileSummary> {
            let prepared = prepare_file(path, &params)?;
            let samples = prepared.sequence.raw_samples();
            let duration_s = match (samples.first(), samples.last()) {
                (Some(first), Some(last)) => last.timestamp - first.timestamp,
                _ => 0,
            };
            let stats = prepared.sequence.stats();
            Ok(FileSummary {
                file: path.display().to_string(),
                frames_per_second: prepared.sequence.frames_per_second(),
                raw_samples: samples.len(),
                accepted: stats.accepted,
                filled: stats.filled,
                duplicates: stats.duplicates,
                laps: stats.laps,
                gear_changes: stats.gear_changes,
                frames: prepared.sequence.frame_count(),
                nominal_frames: prepared.sequence.nominal_frame_count(),
                duration_s,
                truncated: prepared.stop.as_ref().map(|e| e.to_string()),
                elevation_bounds: prepared.track.elevation_bounds(),
                map_bounds: prepared.track.map_bounds(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    serde_json::to_writer_pretty(&mut handle, &summaries)?;
    writeln!(handle)?;
    Ok(())
}

/// Observed range of one record field.
#[derive(Clone, Debug)]
struct FieldRange {
    class: FieldClass,
    seen: usize,
    numeric: usize,
    range: Option<(f64, f64)>,
}

impl FieldRange {
    fn new(name: &str) -> Self {
        Self {
            class: classify(name),
            seen: 0,
            numeric: 0,
            range: None,
        }
    }

    fn observe(&mut self, value: Option<f64>) {
        self.seen += 1;
        if let Some(v) = value {
            self.numeric += 1;
            self.range = Some(match self.range {
                Some((lo, hi)) => (lo.min(v), hi.max(v)),
                None => (v, v),
            });
        }
    }

    fn describe(&self) -> String {
        let range = match self.range {
            Some((lo, hi)) => format!("{:.3}..{:.3}", lo, hi),
            None => "n/a".to_string(),
        };
        format!(
            "{:?}, seen={}, numeric={}, range={}",
            self.class, self.seen, self.numeric, range
        )
    }
}

/// Classification of consecutive record timestamp deltas, in the terms the
/// ingest pass uses.
#[derive(Default, Debug)]
struct StepStats {
    duplicates: usize,
    steps: usize,
    gaps: usize,
    missing_seconds: i64,
    largest_gap_s: i64,
    backwards: usize,
}

impl StepStats {
    fn observe(&mut self, dt: i64) {
        match dt {
            0 => self.duplicates += 1,
            1 => self.steps += 1,
            d if d > 1 => {
                self.gaps += 1;
                self.missing_seconds += d - 1;
                self.largest_gap_s = self.largest_gap_s.max(d);
            }
            _ => self.backwards += 1,
        }
    }
}

fn diagnose_file(path: &Path) -> Result<String> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let messages =
        from_bytes(&data).with_context(|| format!("failed to decode {}", path.display()))?;

    let mut kinds: BTreeMap<String, usize> = BTreeMap::new();
    let mut fields: BTreeMap<String, FieldRange> = BTreeMap::new();
    let mut steps = StepStats::default();
    let mut records = 0usize;
    let mut span: Option<(i64, i64)> = None;

    for message in &messages {
        *kinds.entry(format!("{:?}", message.kind())).or_default() += 1;
        if message.kind() != MesgNum::Record {
            continue;
        }
        records += 1;
        for field in message.fields() {
            fields
                .entry(field.name().to_string())
                .or_insert_with(|| FieldRange::new(field.name()))
                .observe(fit_value_to_f64(field.value()));

            if let (FitValue::Timestamp(ts), "timestamp") = (field.value(), field.name()) {
                let t = ts.with_timezone(&Utc).timestamp();
                span = Some(match span {
                    Some((first, last)) => {
                        steps.observe(t - last);
                        (first, t)
                    }
                    None => (t, t),
                });
            }
        }
    }

    if steps.backwards > 0 {
        warn!(
            "{}: {} backwards timestamp steps; frames stop at the first",
            path.display(),
            steps.backwards
        );
    }

    let mut out = format!("{}\n", path.display());
    out.push_str(&format!("  record messages: {}\n", records));
    if let Some((first, last)) = span {
        out.push_str(&format!("  covers {} s of activity time\n", last - first));
    }
    out.push_str(&format!(
        "  timestamp deltas: 1s={} same-second={} gaps={} (missing {} s, largest {} s) backwards={}\n",
        steps.steps,
        steps.duplicates,
        steps.gaps,
        steps.missing_seconds,
        steps.largest_gap_s,
        steps.backwards
    ));
    out.push_str("  message kinds:\n");
    for (kind, count) in &kinds {
        out.push_str(&format!("    {:<24} {}\n", kind, count));
    }
    out.push_str("  record fields:\n");
    for (name, range) in &fields {
        out.push_str(&format!("    {:<24} {}\n", name, range.describe()));
    }
    Ok(out)
}

fn handle_diagnose(args: DiagnoseArgs) -> Result<()> {
    let reports = args
        .inputs
        .par_iter()
        .map(|path| diagnose_file(path))
        .collect::<Result<Vec<_>>>()?;

    fs::write(&args.output, reports.join("\n"))
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    info!("Wrote diagnostics for {} files: {}", reports.len(), args.output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fit_frames::{Channel, Ingestor, Sample};

    fn frames_csv(fields: &[&str], fps: u32) -> String {
        let mut ing = Ingestor::new();
        ing.add(Sample::new(0).with(Channel::Power, 100.0)).unwrap();
        ing.set_gears("50-11");
        ing.add(Sample::new(1).with(Channel::Power, 200.0)).unwrap();
        let seq = ing.finish().into_sequence(fps).unwrap();

        let set = FieldSet::parse(fields).unwrap();
        let mut buf = Vec::new();
        {
            let mut sink = CsvFrameSink::new(&mut buf, &set).unwrap();
            drive(seq, &mut [&mut sink], None);
            sink.finish().unwrap();
        }
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn csv_has_one_row_per_frame() {
        let text = frames_csv(&["timestamp", "power", "gears"], 2);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "frame,time_s,timestamp,interpolated,power,gears");
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "0,0.000,1970-01-01T00:00:00+00:00,0,100,50-11");
        assert_eq!(lines[2], "1,0.500,,1,150,");
        assert_eq!(lines[3], "2,1.000,1970-01-01T00:00:01+00:00,0,200,");
    }

    #[test]
    fn sink_plans_its_columns_plus_timing() {
        let params = Params::from_json_str(r#"{ "fields": ["power", "gradient"] }"#).unwrap();
        let sink = CsvFrameSink::new(Vec::new(), &params.field_set().unwrap()).unwrap();
        let planned = params.with_fields(&plan_fields(&[&sink as &dyn Renderer]));
        assert_eq!(planned.fields, vec!["timestamp", "power", "gradient", "interpolated"]);
        assert!(planned.derive_gradient());
        let decoded = planned.field_set().unwrap().decoder_fields();
        assert!(decoded.contains(Field::Channel(Channel::Altitude)));
        assert!(decoded.contains(Field::Channel(Channel::Distance)));
    }

    #[test]
    fn truncation_is_noted_once_with_the_path() {
        let mut ing = Ingestor::new();
        ing.add(Sample::new(10)).unwrap();
        let stop = ing.add(Sample::new(5)).unwrap_err();
        let sequence = ing.finish().into_sequence(10).unwrap();
        let track = sequence.track();
        let mut prepared = Prepared {
            sequence,
            track,
            stop: None,
        };
        let path = Path::new("ride.fit");
        assert_eq!(truncation_note(path, &prepared), None);
        prepared.stop = Some(stop);
        assert_eq!(
            truncation_note(path, &prepared).as_deref(),
            Some("ride.fit: timestamp went backwards: 5 after 10; keeping the 1 samples read before it")
        );
    }

    #[test]
    fn offset_is_whole_seconds() {
        let args = PipelineArgs {
            config: None,
            fps: Some(25),
            offset: Some(-1.5),
            fields: Some(vec!["power".into(), " speed ".into()]),
            verbose: false,
        };
        let params = build_params(&args).unwrap();
        assert_eq!(params.frames_per_second, 25);
        assert_eq!(params.time_offset_s, -5400);
        assert_eq!(params.fields, vec!["power", "speed"]);
    }

    #[test]
    fn unknown_field_flag_is_rejected() {
        let args = PipelineArgs {
            config: None,
            fps: None,
            offset: None,
            fields: Some(vec!["watts".into()]),
            verbose: false,
        };
        assert!(build_params(&args).is_err());
    }

    #[test]
    fn default_output_sits_next_to_input() {
        let out = default_output_path(Path::new("/rides/morning.fit"));
        assert_eq!(out, PathBuf::from("/rides/morning_frames.csv"));
    }

    #[test]
    fn field_range_tracks_class_and_extent() {
        let mut power = FieldRange::new("power");
        power.observe(Some(180.0));
        power.observe(None);
        power.observe(Some(420.0));
        assert_eq!(power.class, FieldClass::Continuous);
        assert_eq!(power.seen, 3);
        assert_eq!(power.numeric, 2);
        assert_eq!(power.range, Some((180.0, 420.0)));
        assert_eq!(FieldRange::new("left_right_balance").class, FieldClass::Held);
    }

    #[test]
    fn step_stats_classify_deltas() {
        let mut steps = StepStats::default();
        for dt in [1, 1, 0, 4, -2, 1] {
            steps.observe(dt);
        }
        assert_eq!(steps.steps, 3);
        assert_eq!(steps.duplicates, 1);
        assert_eq!(steps.gaps, 1);
        assert_eq!(steps.missing_seconds, 3);
        assert_eq!(steps.largest_gap_s, 4);
        assert_eq!(steps.backwards, 1);
    }
}
