use crate::config::{HOME_ENV, Overrides, Paths, Settings, UserConfig};
use crate::embed::{BackendLoader, LocalLoader, ModelChoice};
use crate::error::{EmbedError, Result};
use crate::pipeline::embed_request;
use crate::protocol::{ErrorResponse, ModelEntry, ModelListing, to_line};
use clap::Parser;
use clap::error::ErrorKind;
use serde::Serialize;
use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Log filter for diagnostics on stderr; logging is off unless this is set.
pub const LOG_ENV: &str = "SEMANTIC_EMBED_LOG";

#[derive(Parser, Debug)]
#[command(
    name = "semantic-embed",
    version,
    about = "Embed texts read as JSON from stdin; prints {\"embeddings\", \"model\", \"dimension\"}"
)]
pub struct Cli {
    /// Embedding model identifier [default: all-MiniLM-L6-v2]
    pub model: Option<String>,

    /// Directory for cached model weights
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Backend batch size used while embedding
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// Maximum tokens per text
    #[arg(long, value_name = "N")]
    pub max_length: Option<usize>,

    /// Print the supported models as JSON and exit
    #[arg(long)]
    pub list_models: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            model: self.model.clone(),
            cache_dir: self.cache_dir.clone(),
            batch_size: self.batch_size,
            max_length: self.max_length,
        }
    }
}

pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("off"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .try_init();
}

/// Process entry point. Returns the exit status.
pub fn run() -> u8 {
    init_logging();
    let root = std::env::var_os(HOME_ENV).map(PathBuf::from);
    run_with(
        std::env::args_os(),
        root,
        &LocalLoader,
        &mut std::io::stdin().lock(),
        &mut std::io::stdout().lock(),
        &mut std::io::stderr().lock(),
    )
}

/// Everything `run` does, with the process environment passed in.
/// Exactly one of `stdout` (success) or `stderr` (failure) is written.
pub fn run_with<I, T>(
    args: I,
    root: Option<PathBuf>,
    loader: &dyn BackendLoader,
    stdin: &mut dyn Read,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> u8
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = write!(stdout, "{}", err.render());
            return 0;
        }
        Err(err) => {
            let rendered = err.to_string();
            let first = rendered.lines().next().unwrap_or_default();
            let msg = first.strip_prefix("error: ").unwrap_or(first);
            return emit_error(stderr, &EmbedError::Usage(msg.to_string()));
        }
    };

    let result = if cli.list_models {
        emit_json(stdout, &list_models())
    } else {
        execute(&cli, root, loader, stdin).and_then(|resp| emit_json(stdout, &resp))
    };

    match result {
        Ok(()) => 0,
        Err(err) => emit_error(stderr, &err),
    }
}

fn execute(
    cli: &Cli,
    root: Option<PathBuf>,
    loader: &dyn BackendLoader,
    stdin: &mut dyn Read,
) -> Result<crate::protocol::EmbeddingResponse> {
    let paths = Paths::new(root)?;
    let config = UserConfig::load(&paths)?;
    let settings = Settings::resolve(&paths, &config, cli.overrides());
    tracing::debug!(model = %settings.model, root = %paths.root.display(), "resolved settings");

    let mut input = String::new();
    stdin.read_to_string(&mut input).map_err(|e| match e.kind() {
        std::io::ErrorKind::InvalidData => EmbedError::InputFormat(None),
        _ => EmbedError::Io(e),
    })?;

    embed_request(&input, &settings.model, loader, &settings.load)
}

pub fn list_models() -> ModelListing {
    ModelListing {
        models: ModelChoice::ALL
            .into_iter()
            .map(|choice| ModelEntry {
                id: choice.id(),
                aliases: choice.aliases(),
                backend: choice.backend().name(),
                dimension: choice.dims(),
                available: choice.backend().is_available(),
            })
            .collect(),
    }
}

fn emit_json<T: Serialize>(out: &mut dyn Write, value: &T) -> Result<()> {
    let json = to_line(value).map_err(std::io::Error::from)?;
    writeln!(out, "{json}")?;
    out.flush()?;
    Ok(())
}

fn emit_error(out: &mut dyn Write, err: &EmbedError) -> u8 {
    tracing::debug!(error = ?err, "request failed");
    let json = to_line(&ErrorResponse::from(err))
        .unwrap_or_else(|_| r#"{"error": "internal error"}"#.to_string());
    let _ = writeln!(out, "{json}");
    let _ = out.flush();
    err.exit_code()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{EmbedderHandle, LoadOptions, TextEmbedder};
    use serde_json::Value;

    struct Constant;

    impl TextEmbedder for Constant {
        fn embed(&mut self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 1.0, 1.0, 1.0]).collect())
        }
    }

    struct FakeLoader;

    impl BackendLoader for FakeLoader {
        fn load(&self, _choice: ModelChoice, _opts: &LoadOptions) -> Result<EmbedderHandle> {
            Ok(EmbedderHandle::new(Box::new(Constant), 4))
        }
    }

    struct Unavailable;

    impl BackendLoader for Unavailable {
        fn load(&self, choice: ModelChoice, _opts: &LoadOptions) -> Result<EmbedderHandle> {
            Err(choice.backend().missing())
        }
    }

    struct Outcome {
        code: u8,
        stdout: String,
        stderr: String,
    }

    fn invoke(args: &[&str], input: &str, loader: &dyn BackendLoader) -> Outcome {
        let dir = tempfile::tempdir().expect("tempdir");
        invoke_in(dir.path().to_path_buf(), args, input.as_bytes(), loader)
    }

    fn invoke_in(root: PathBuf, args: &[&str], input: &[u8], loader: &dyn BackendLoader) -> Outcome {
        let mut argv = vec!["semantic-embed"];
        argv.extend_from_slice(args);
        let mut stdin = input;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let code = run_with(argv, Some(root), loader, &mut stdin, &mut stdout, &mut stderr);
        Outcome {
            code,
            stdout: String::from_utf8(stdout).expect("utf8 stdout"),
            stderr: String::from_utf8(stderr).expect("utf8 stderr"),
        }
    }

    fn error_of(outcome: &Outcome) -> String {
        let value: Value = serde_json::from_str(outcome.stderr.trim()).expect("stderr json");
        value["error"].as_str().expect("error string").to_string()
    }

    #[test]
    fn test_success_uses_default_model() {
        let out = invoke(&[], r#"{"texts": ["hello world"]}"#, &FakeLoader);
        assert_eq!(out.code, 0);
        assert!(out.stderr.is_empty());
        assert_eq!(out.stdout.lines().count(), 1);
        let value: Value = serde_json::from_str(&out.stdout).expect("stdout json");
        assert_eq!(value["model"], "all-MiniLM-L6-v2");
        assert_eq!(value["dimension"], 4);
        assert_eq!(value["embeddings"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn test_model_argument_is_echoed() {
        let out = invoke(&["bge-small-en-v1.5"], r#"{"texts": ["a", "b"]}"#, &FakeLoader);
        assert_eq!(out.code, 0);
        let value: Value = serde_json::from_str(&out.stdout).expect("stdout json");
        assert_eq!(value["model"], "bge-small-en-v1.5");
        assert_eq!(value["embeddings"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_config_model_applies_without_argument() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("config.toml"), "model = \"nomic\"\n").expect("write");
        let out = invoke_in(
            dir.path().to_path_buf(),
            &[],
            br#"{"texts": ["a"]}"#,
            &FakeLoader,
        );
        assert_eq!(out.code, 0);
        assert!(out.stdout.contains(r#""model": "nomic""#));
    }

    #[test]
    fn test_validation_errors() {
        for (input, msg) in [
            ("{}", "No texts provided"),
            (r#"{"texts": []}"#, "No texts provided"),
            ("not valid json", "Invalid input. Expected JSON with 'texts' array."),
        ] {
            let out = invoke(&[], input, &FakeLoader);
            assert_eq!(out.code, 1, "input {input}");
            assert!(out.stdout.is_empty());
            assert_eq!(error_of(&out), msg);
        }
    }

    #[test]
    fn test_non_utf8_stdin_is_input_format() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = invoke_in(dir.path().to_path_buf(), &[], &[0xff, 0xfe, 0x00], &FakeLoader);
        assert_eq!(out.code, 1);
        assert!(out.stdout.is_empty());
        assert!(error_of(&out).starts_with("Invalid input"));
    }

    #[test]
    fn test_dependency_missing() {
        let out = invoke(&[], r#"{"texts": ["a"]}"#, &Unavailable);
        assert_eq!(out.code, 1);
        assert!(out.stdout.is_empty());
        assert!(error_of(&out).contains("fastembed backend not available"));
    }

    #[test]
    fn test_bad_flag_is_json_error() {
        let out = invoke(&["--frobnicate"], r#"{"texts": ["a"]}"#, &FakeLoader);
        assert_eq!(out.code, 1);
        assert!(out.stdout.is_empty());
        assert_eq!(out.stderr.lines().count(), 1);
        assert!(error_of(&out).contains("--frobnicate"));
    }

    #[test]
    fn test_help_exits_zero() {
        let out = invoke(&["--help"], "", &FakeLoader);
        assert_eq!(out.code, 0);
        assert!(out.stdout.contains("--list-models"));
    }

    #[test]
    fn test_list_models() {
        let out = invoke(&["--list-models"], "", &Unavailable);
        assert_eq!(out.code, 0);
        let value: Value = serde_json::from_str(&out.stdout).expect("stdout json");
        let models = value["models"].as_array().expect("models");
        assert_eq!(models.len(), ModelChoice::ALL.len());
        assert_eq!(models[0]["id"], "all-MiniLM-L6-v2");
        assert_eq!(models[0]["dimension"], 384);
    }
}
