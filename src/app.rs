use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing_subscriber::EnvFilter;

use crate::cli::args::CliArgs;
use crate::cli::validation;
use crate::config::{self, ConfigFile};
use crate::output::{self, OutputFormat, ResultKind, ScanReport};
use crate::runner::{GeneratorChoice, Options, Runner, WordlistSource};

fn print_banner() {
    const BANNER: &str = r#"
       ___                     __
  ____/ (_)________  _________  / /_  ___
 / __  / / ___/ __ \/ ___/ __ \/ __ \/ _ \
/ /_/ / / /  / /_/ / /  / /_/ / /_/ /  __/
\__,_/_/_/  / .___/_/   \____/_.___/\___/
           /_/
      recursive web content discovery
    "#;
    print!("{}", BANNER);
    println!();
}

fn format_kv_line(label: &str, value: &str) {
    println!(":: {:<10}: {}", label, value);
}

fn format_eta(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}

struct OutputSettings {
    file: Option<String>,
    format: OutputFormat,
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

fn parse_headers(raw: &[String]) -> Result<Vec<(String, String)>, String> {
    raw.iter()
        .map(|header| {
            header
                .split_once(':')
                .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
                .ok_or_else(|| format!("invalid header '{header}', expected \"Key: Value\""))
        })
        .collect()
}

fn build_options(args: &CliArgs, cfg: &ConfigFile) -> Result<(Options, OutputSettings), String> {
    let target = args
        .url
        .clone()
        .or_else(|| cfg.url.clone())
        .ok_or_else(|| "no target URL; pass -u or set 'url' in the config".to_string())?;

    let charset = args.charset.clone().or_else(|| cfg.charset.clone());
    let fuzz_start = args.fuzz_start.clone().or_else(|| cfg.fuzz_start.clone());
    let fuzz_end = args.fuzz_end.clone().or_else(|| cfg.fuzz_end.clone());

    let generator = if let Some(charset) = charset {
        let min_len = args.min_len.or(cfg.min_len).unwrap_or(1);
        let max_len = args.max_len.or(cfg.max_len).unwrap_or(min_len);
        GeneratorChoice::BruteForce {
            charset,
            min_len,
            max_len,
        }
    } else if let (Some(start), Some(end)) = (fuzz_start, fuzz_end) {
        GeneratorChoice::UrlFuzz { start, end }
    } else {
        GeneratorChoice::Dictionary
    };

    let wordlist = args
        .wordlist
        .clone()
        .or_else(|| cfg.wordlist.clone())
        .map(|path| WordlistSource::FilePath(config::expand_tilde_string(&path)));

    let extensions = args
        .extensions
        .clone()
        .or_else(|| cfg.extensions.clone())
        .map(|raw| parse_csv(&raw))
        .unwrap_or_default();

    let headers = if args.header.is_empty() {
        parse_headers(cfg.header.as_deref().unwrap_or_default())?
    } else {
        parse_headers(&args.header)?
    };

    let mut fail_case_regexes = args.fail_regex.clone();
    if fail_case_regexes.is_empty() {
        fail_case_regexes = cfg.fail_regex.clone().unwrap_or_default();
    }

    let defaults = Options::default();
    let exts_to_skip = args
        .exts_to_skip
        .clone()
        .or_else(|| cfg.exts_to_skip.clone())
        .map(|raw| parse_csv(&raw))
        .unwrap_or(defaults.exts_to_skip);

    let skip_files = args.skip_files || cfg.skip_files.unwrap_or(false);
    let do_files = !skip_files && (!extensions.is_empty() || args.blank_ext);

    let options = Options {
        target,
        wordlist,
        generator,
        extensions,
        blank_ext: args.blank_ext || cfg.blank_ext.unwrap_or(false),
        do_dirs: !(args.skip_dirs || cfg.skip_dirs.unwrap_or(false)),
        do_files,
        recursive: !(args.no_recurse || cfg.no_recurse.unwrap_or(false)),
        case_insensitive: args.case_insensitive || cfg.case_insensitive.unwrap_or(false),
        only_under_start_point: !(args.anywhere || cfg.anywhere.unwrap_or(false)),
        workers: args.threads.or(cfg.workers).unwrap_or(defaults.workers),
        timeout_seconds: args
            .timeout
            .or(cfg.timeout)
            .unwrap_or(defaults.timeout_seconds),
        proxy: args.proxy.clone().or_else(|| cfg.proxy.clone()),
        follow_redirects: args.follow_redirects || cfg.follow_redirects.unwrap_or(false),
        headers,
        rate_limit: args.rate.or(cfg.rate),
        fail_case: args
            .fail_case
            .clone()
            .or_else(|| cfg.fail_case.clone())
            .unwrap_or(defaults.fail_case),
        fail_case_regexes,
        exts_to_skip,
        auto_switch_head: !(args.get_only || cfg.get_only.unwrap_or(false)),
    };

    let file = args.output.clone().or_else(|| cfg.output.clone());
    let format = args
        .output_format
        .clone()
        .or_else(|| cfg.output_format.clone())
        .and_then(|raw| OutputFormat::parse(&raw))
        .or_else(|| file.as_deref().and_then(output::infer_format_from_path))
        .unwrap_or(OutputFormat::Text);

    Ok((options, OutputSettings { file, format }))
}

fn color_disabled(args: &CliArgs, cfg: &ConfigFile) -> bool {
    args.no_color || cfg.no_color.unwrap_or(false)
}

fn init_tracing(verbose: u8) {
    let default_filter = match verbose {
        0 => "dirprobe=info",
        1 => "dirprobe=debug",
        _ => "dirprobe=trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_event(pb: &ProgressBar, event: &output::DiscoveryResult) {
    let line = match event.kind {
        ResultKind::Directory => {
            let flag = if event.low_confidence { " (?)" } else { "" };
            format!(
                "{} {} {}{}",
                "Dir found:".bold().green(),
                event.path,
                event.status,
                flag
            )
        }
        ResultKind::File => {
            let flag = if event.low_confidence { " (?)" } else { "" };
            format!(
                "{} {} {}{}",
                "File found:".bold().blue(),
                event.path,
                event.status,
                flag
            )
        }
        ResultKind::Error => format!(
            "{} {} {}",
            "Error:".bold().red(),
            event.path,
            event.message.as_deref().unwrap_or("")
        ),
    };
    pb.println(line);
}

async fn run_async(options: Options, out: OutputSettings) -> Result<(), String> {
    let runner = Runner::new(options).map_err(|e| e.to_string())?;

    format_kv_line("Target", runner.first_part());
    format_kv_line("Start", runner.start_point());
    println!();

    let mut scan = runner.start().await.map_err(|e| e.to_string())?;

    let pb = ProgressBar::new(1);
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.enable_steady_tick(Duration::from_millis(200));
    pb.set_style(
        ProgressStyle::with_template(
            ":: Progress: [{pos}/{len}] :: Duration: [{elapsed_precise}] :: {msg}",
        )
        .map_err(|e| format!("failed to build progress bar style: {e}"))?
        .progress_chars(r#"#>-"#),
    );

    let printer = {
        let pb = pb.clone();
        let mut events = scan.events.take();
        tokio::spawn(async move {
            if let Some(events) = events.as_mut() {
                while let Some(event) = events.recv().await {
                    print_event(&pb, &event);
                }
            }
        })
    };

    let ticker = {
        let pb = pb.clone();
        let mut progress = scan.progress.clone();
        tokio::spawn(async move {
            while progress.changed().await.is_ok() {
                let snapshot = *progress.borrow();
                pb.set_length(snapshot.estimated_total.max(1));
                pb.set_position(snapshot.total_done);
                let eta = snapshot
                    .eta_seconds
                    .map(format_eta)
                    .unwrap_or_else(|| "--".to_string());
                pb.set_message(format!(
                    "{:.0} req/s :: ETA {}",
                    snapshot.avg_rate, eta
                ));
            }
        })
    };

    {
        let controls = scan.controls.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                controls.stop();
            }
        });
    }

    let report = scan.wait().await;
    printer.abort();
    ticker.abort();
    pb.finish_and_clear();

    print_summary(&report);
    write_report(&report, &out).await?;

    println!();
    println!(
        ":: Completed :: scan took {}s ::",
        report.elapsed_seconds as u64
    );
    Ok(())
}

fn print_summary(report: &ScanReport) {
    println!();
    print!("{}", report.render_text());
}

async fn write_report(report: &ScanReport, out: &OutputSettings) -> Result<(), String> {
    let Some(path) = out.file.as_deref() else {
        return Ok(());
    };
    let rendered = report
        .render(out.format)
        .map_err(|e| format!("failed to render report: {e}"))?;
    tokio::fs::write(config::expand_tilde(path), rendered)
        .await
        .map_err(|e| format!("failed to write output file '{path}': {e}"))?;
    println!(":: Report written to {path}");
    Ok(())
}

pub fn run_cli() -> Result<(), String> {
    let args = CliArgs::parse();
    validation::validate(&args)?;

    init_tracing(args.verbose);
    print_banner();

    let cfg = match args.config.as_deref() {
        Some(path) => config::load_config(&config::expand_tilde(path), false)?,
        None => match config::default_config_path() {
            Some(path) => {
                config::ensure_default_config_file(&path)?;
                config::load_config(&path, true)?
            }
            None => ConfigFile::default(),
        },
    };

    if color_disabled(&args, &cfg) {
        colored::control::set_override(false);
    }

    let (options, out) = build_options(&args, &cfg)?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to build runtime: {e}"))?;
    rt.block_on(run_async(options, out))
}

#[cfg(test)]
mod cli_tests {
    use clap::Parser;

    use super::*;

    fn parse(argv: &[&str]) -> CliArgs {
        CliArgs::parse_from(std::iter::once("dirprobe").chain(argv.iter().copied()))
    }

    #[test]
    fn cli_overrides_config() {
        let args = parse(&["-u", "http://cli.example/", "-l", "w.txt", "-t", "50"]);
        let cfg = ConfigFile {
            url: Some("http://cfg.example/".into()),
            workers: Some(5),
            rate: Some(100),
            ..ConfigFile::default()
        };
        let (options, _) = build_options(&args, &cfg).unwrap();
        assert_eq!(options.target, "http://cli.example/");
        assert_eq!(options.workers, 50);
        // config still fills what the CLI left unset
        assert_eq!(options.rate_limit, Some(100));
    }

    #[test]
    fn extensions_enable_file_pass() {
        let args = parse(&["-u", "http://t/", "-l", "w.txt", "-e", "php, bak"]);
        let (options, _) = build_options(&args, &ConfigFile::default()).unwrap();
        assert!(options.do_files);
        assert_eq!(options.extensions, vec!["php", "bak"]);
    }

    #[test]
    fn charset_selects_brute_force() {
        let args = parse(&["-u", "http://t/", "--charset", "ab", "--max-len", "2"]);
        let (options, _) = build_options(&args, &ConfigFile::default()).unwrap();
        assert!(matches!(
            options.generator,
            GeneratorChoice::BruteForce { min_len: 1, max_len: 2, .. }
        ));
    }

    #[test]
    fn output_format_inferred_from_path() {
        let args = parse(&["-u", "http://t/", "-l", "w.txt", "-o", "scan.json"]);
        let (_, out) = build_options(&args, &ConfigFile::default()).unwrap();
        assert_eq!(out.format, OutputFormat::Json);
    }

    #[test]
    fn config_can_disable_color() {
        let args = parse(&["-u", "http://t/", "-l", "w.txt"]);
        let cfg = ConfigFile {
            no_color: Some(true),
            ..ConfigFile::default()
        };
        assert!(color_disabled(&args, &cfg));
        assert!(!color_disabled(&args, &ConfigFile::default()));

        let args = parse(&["-u", "http://t/", "-l", "w.txt", "--nc"]);
        assert!(color_disabled(&args, &ConfigFile::default()));
    }

    #[test]
    fn bad_header_rejected() {
        let args = parse(&["-u", "http://t/", "-l", "w.txt", "-H", "nocolon"]);
        assert!(build_options(&args, &ConfigFile::default()).is_err());
    }
}
