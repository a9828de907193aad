use clap::{ArgAction, Parser};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "dirprobe",
    version,
    about = "recursive web content discovery tool",
    long_about = "Dirprobe brute-forces hidden directories and files on web servers, learning per-directory not-found behavior so soft-404 pages do not drown the results.\n\nExamples:\n  dirprobe -u https://target.tld/ -l wordlist.txt\n  dirprobe -u https://target.tld/app/ -l wordlist.txt -e php,bak -t 50\n  dirprobe -u https://target.tld/ --charset abc123 --min-len 1 --max-len 3\n\nTip: Use --config to persist scan settings and keep CLI invocations short."
)]
pub struct CliArgs {
    #[arg(
        short = 'u',
        long = "url",
        value_name = "URL",
        help_heading = "Input",
        help = "Target URL; its path becomes the scan start point."
    )]
    pub url: Option<String>,

    #[arg(
        short = 'l',
        long = "wl",
        visible_alias = "wordlist",
        value_name = "FILE",
        help_heading = "Input",
        help = "Wordlist of path candidates (one per line, # comments)."
    )]
    pub wordlist: Option<String>,

    #[arg(
        short = 'C',
        long = "cfg",
        visible_alias = "config",
        value_name = "FILE",
        help_heading = "Input",
        help = "Path to config file (defaults to ~/.dirprobe/config.yml)."
    )]
    pub config: Option<String>,

    #[arg(
        short = 'e',
        long = "ext",
        visible_alias = "extensions",
        value_name = "EXTS",
        help_heading = "Scan",
        help = "File extensions to probe, comma-separated (e.g. php,bak)."
    )]
    pub extensions: Option<String>,

    #[arg(
        long = "be",
        visible_alias = "blank-ext",
        help_heading = "Scan",
        help = "Also probe file candidates with no extension."
    )]
    pub blank_ext: bool,

    #[arg(
        long = "sd",
        visible_alias = "skip-dirs",
        help_heading = "Scan",
        help = "Skip the directory pass."
    )]
    pub skip_dirs: bool,

    #[arg(
        long = "sf",
        visible_alias = "skip-files",
        help_heading = "Scan",
        help = "Skip the file pass."
    )]
    pub skip_files: bool,

    #[arg(
        long = "nr",
        visible_alias = "no-recurse",
        help_heading = "Scan",
        help = "Do not descend into found directories."
    )]
    pub no_recurse: bool,

    #[arg(
        long = "ci",
        visible_alias = "case-insensitive",
        help_heading = "Scan",
        help = "Treat paths case-insensitively when deduplicating."
    )]
    pub case_insensitive: bool,

    #[arg(
        long = "aw",
        visible_alias = "anywhere",
        help_heading = "Scan",
        help = "Recurse into found directories outside the start point too."
    )]
    pub anywhere: bool,

    #[arg(
        long = "fc",
        visible_alias = "fail-case",
        value_name = "STRING",
        help_heading = "Detection",
        help = "Path fragment that must not exist on the server."
    )]
    pub fail_case: Option<String>,

    #[arg(
        long = "fr",
        visible_alias = "fail-regex",
        value_name = "REGEX",
        action = ArgAction::Append,
        help_heading = "Detection",
        help = "Pattern recognizing unstable not-found pages (repeatable)."
    )]
    pub fail_regex: Vec<String>,

    #[arg(
        long = "es",
        visible_alias = "exts-to-skip",
        value_name = "EXTS",
        help_heading = "Detection",
        help = "Link extensions the crawl feedback ignores, comma-separated."
    )]
    pub exts_to_skip: Option<String>,

    #[arg(
        long = "go",
        visible_alias = "get-only",
        help_heading = "Detection",
        help = "Never probe with HEAD, even where status alone decides."
    )]
    pub get_only: bool,

    #[arg(
        long = "cs",
        visible_alias = "charset",
        value_name = "CHARS",
        help_heading = "Brute force",
        help = "Generate candidates from this character set instead of a wordlist."
    )]
    pub charset: Option<String>,

    #[arg(
        long = "min-len",
        value_name = "N",
        help_heading = "Brute force",
        help = "Minimum generated candidate length."
    )]
    pub min_len: Option<usize>,

    #[arg(
        long = "max-len",
        value_name = "N",
        help_heading = "Brute force",
        help = "Maximum generated candidate length."
    )]
    pub max_len: Option<usize>,

    #[arg(
        long = "fs",
        visible_alias = "fuzz-start",
        value_name = "PREFIX",
        help_heading = "URL fuzzing",
        help = "URL template prefix; candidates are substituted between the markers."
    )]
    pub fuzz_start: Option<String>,

    #[arg(
        long = "fe",
        visible_alias = "fuzz-end",
        value_name = "SUFFIX",
        help_heading = "URL fuzzing",
        help = "URL template suffix."
    )]
    pub fuzz_end: Option<String>,

    #[arg(
        short = 't',
        long = "th",
        visible_alias = "threads",
        value_name = "N",
        help_heading = "Performance",
        help = "Number of worker tasks."
    )]
    pub threads: Option<usize>,

    #[arg(
        short = 'r',
        long = "rt",
        visible_alias = "rate",
        value_name = "RPS",
        help_heading = "Performance",
        help = "Request rate limit (requests per second)."
    )]
    pub rate: Option<u32>,

    #[arg(
        long = "to",
        visible_alias = "timeout",
        value_name = "SECONDS",
        help_heading = "Performance",
        help = "Per-request timeout."
    )]
    pub timeout: Option<usize>,

    #[arg(
        short = 'p',
        long = "px",
        visible_alias = "proxy",
        value_name = "URL",
        help_heading = "HTTP",
        help = "Route requests through this proxy."
    )]
    pub proxy: Option<String>,

    #[arg(
        long = "fw",
        visible_alias = "follow-redirects",
        help_heading = "HTTP",
        help = "Follow redirects instead of reporting them."
    )]
    pub follow_redirects: bool,

    #[arg(
        short = 'H',
        long = "hd",
        visible_alias = "header",
        value_name = "HEADER",
        action = ArgAction::Append,
        help_heading = "HTTP",
        help = "Extra request header as \"Key: Value\" (repeatable)."
    )]
    pub header: Vec<String>,

    #[arg(
        short = 'o',
        long = "out",
        visible_alias = "output",
        value_name = "FILE",
        help_heading = "Output",
        help = "Write the final report to this file."
    )]
    pub output: Option<String>,

    #[arg(
        long = "of",
        visible_alias = "output-format",
        value_name = "FORMAT",
        help_heading = "Output",
        help = "Report format: text or json (inferred from --out when omitted)."
    )]
    pub output_format: Option<String>,

    #[arg(
        long = "nc",
        visible_alias = "no-color",
        help_heading = "Output",
        help = "Disable colored output."
    )]
    pub no_color: bool,

    #[arg(
        short = 'v',
        long = "vb",
        visible_alias = "verbose",
        action = ArgAction::Count,
        help_heading = "Output",
        help = "Increase verbosity (-v, -vv)."
    )]
    pub verbose: u8,
}
