use crate::cli::args::CliArgs;
use crate::output::OutputFormat;

pub fn validate(args: &CliArgs) -> Result<(), String> {
    let brute = args.charset.is_some();
    let fuzz = args.fuzz_start.is_some() || args.fuzz_end.is_some();

    if fuzz && (args.fuzz_start.is_none() || args.fuzz_end.is_none()) {
        return Err("--fuzz-start and --fuzz-end must be given together".to_string());
    }
    if brute && fuzz {
        return Err("--charset and --fuzz-start cannot be combined".to_string());
    }

    if brute {
        let min = args.min_len.unwrap_or(1);
        let max = args.max_len.unwrap_or(min);
        if min == 0 || max < min {
            return Err(format!("invalid candidate length range {min}-{max}"));
        }
    }

    if args.skip_dirs && args.skip_files && !fuzz {
        return Err("both passes disabled, nothing to scan".to_string());
    }
    if let Some(threads) = args.threads {
        if threads == 0 {
            return Err("invalid --threads, expected positive integer".to_string());
        }
    }
    if let Some(rate) = args.rate {
        if rate == 0 {
            return Err("invalid --rate, expected positive integer".to_string());
        }
    }

    for header in &args.header {
        if !header.contains(':') {
            return Err(format!("invalid --header '{header}', expected \"Key: Value\""));
        }
    }

    for pattern in &args.fail_regex {
        regex::Regex::new(pattern)
            .map_err(|e| format!("invalid --fail-regex '{pattern}': {e}"))?;
    }

    if let Some(raw) = args.output_format.as_deref() {
        if OutputFormat::parse(raw).is_none() {
            return Err(format!("invalid --output-format '{raw}', expected text or json"));
        }
    }

    Ok(())
}
