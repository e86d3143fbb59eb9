mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_FAILURE, EXIT_STORE_ERROR, EXIT_USAGE};
use ocitool_core::{install_signal_handler, load_settings};
use ocitool_store::CancelToken;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "oci-image-tool",
    version,
    about = "Validate, unpack, and convert OCI images"
)]
struct Cli {
    /// Settings file (defaults to $OCI_IMAGE_TOOL_CONFIG, then ~/.config/oci-image-tool/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate one or more image layouts, image archives, manifests, or configs.
    Validate {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Input type: imageLayout, image, manifest, manifestList, or config. Auto-detected when unset.
        #[arg(long = "type")]
        kind: Option<String>,
        /// Reference to validate (repeatable). Only used for imageLayout and image inputs.
        #[arg(long = "ref")]
        refs: Vec<String>,
    },
    /// Unpack the layers of an image into a directory.
    Unpack {
        source: PathBuf,
        dest: PathBuf,
        /// Input type: imageLayout or image. Auto-detected when unset.
        #[arg(long = "type")]
        kind: Option<String>,
        /// Reference to unpack.
        #[arg(long = "ref")]
        reference: Option<String>,
    },
    /// Create an OCI runtime bundle (rootfs plus config.json) from an image.
    CreateRuntimeBundle {
        source: PathBuf,
        dest: PathBuf,
        /// Input type: imageLayout or image. Auto-detected when unset.
        #[arg(long = "type")]
        kind: Option<String>,
        /// Reference to unpack.
        #[arg(long = "ref")]
        reference: Option<String>,
        /// Bundle subdirectory for the root filesystem.
        #[arg(long)]
        rootfs: Option<String>,
    },
    /// Create a layer tarball from CHILD, or from the changes between PARENT and CHILD.
    CreateLayer {
        /// [PARENT] CHILD
        #[arg(required = true, num_args = 1..=2, value_names = ["PARENT", "CHILD"])]
        paths: Vec<PathBuf>,
        /// Output file (default: CHILD.tar, or CHILD.tar.gz with --gzip).
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Compress the layer with gzip.
        #[arg(long, default_value_t = false)]
        gzip: bool,
    },
    /// Initialise empty storage.
    Init {
        #[command(subcommand)]
        command: InitCommand,
    },
    /// Low-level access to the content-addressable blob store of a layout.
    Cas {
        #[command(subcommand)]
        command: CasCommand,
    },
    /// Low-level access to the named references of a layout.
    Refs {
        #[command(subcommand)]
        command: RefsCommand,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum InitCommand {
    /// Create an empty image layout: a tarball, or a directory with --directory.
    ImageLayout {
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        directory: bool,
    },
}

#[derive(Debug, Subcommand)]
enum CasCommand {
    /// Write a blob to stdout.
    Get { path: PathBuf, digest: String },
    /// Store stdin as a blob and print its digest.
    Put { path: PathBuf },
    /// Remove a blob.
    Delete { path: PathBuf, digest: String },
}

#[derive(Debug, Subcommand)]
enum RefsCommand {
    /// Print the descriptor a reference points at.
    Get { path: PathBuf, name: String },
    /// Store the descriptor read from stdin under NAME.
    Put { path: PathBuf, name: String },
    /// List reference names in lexical order.
    List {
        path: PathBuf,
        /// Only list names starting with this prefix.
        #[arg(long, default_value = "")]
        prefix: String,
        /// Maximum number of names (negative for no limit).
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        size: i64,
        /// Number of matching names to skip.
        #[arg(long, default_value_t = 0)]
        from: usize,
    },
    /// Remove a reference.
    Delete { path: PathBuf, name: String },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref());

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        settings
            .as_ref()
            .ok()
            .and_then(|s| s.log.as_deref())
            .unwrap_or("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("OCI_IMAGE_TOOL_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let cancel = CancelToken::new();
    install_signal_handler(cancel.clone());
    let json = cli.json;

    let result = match cli.command {
        Commands::Validate { files, kind, refs } => {
            let refs = if refs.is_empty() {
                vec![settings.default_ref.clone()]
            } else {
                refs
            };
            commands::validate::run(&files, kind.as_deref(), &refs, &cancel, json)
        }
        Commands::Unpack {
            source,
            dest,
            kind,
            reference,
        } => commands::unpack::run(
            &source,
            &dest,
            kind.as_deref(),
            reference.as_deref().unwrap_or(&settings.default_ref),
            &cancel,
            json,
        ),
        Commands::CreateRuntimeBundle {
            source,
            dest,
            kind,
            reference,
            rootfs,
        } => commands::bundle::run(
            &source,
            &dest,
            kind.as_deref(),
            reference.as_deref().unwrap_or(&settings.default_ref),
            rootfs.as_deref().unwrap_or(&settings.rootfs),
            &cancel,
            json,
        ),
        Commands::CreateLayer {
            paths,
            output,
            gzip,
        } => {
            let (parent, child) = match paths.as_slice() {
                [child] => (None, child),
                [parent, child] => (Some(parent.as_path()), child),
                _ => {
                    eprintln!("error: usage error: one or two directories are required");
                    return ExitCode::from(EXIT_USAGE);
                }
            };
            commands::create_layer::run(parent, child, output.as_deref(), gzip, json)
        }
        Commands::Init {
            command: InitCommand::ImageLayout { path, directory },
        } => commands::init::run(&path, directory, json),
        Commands::Cas { command } => match command {
            CasCommand::Get { path, digest } => commands::cas::get(&path, &digest, &cancel),
            CasCommand::Put { path } => commands::cas::put(&path, &cancel, json),
            CasCommand::Delete { path, digest } => commands::cas::delete(&path, &digest, &cancel),
        },
        Commands::Refs { command } => match command {
            RefsCommand::Get { path, name } => commands::refs::get(&path, &name, &cancel),
            RefsCommand::Put { path, name } => commands::refs::put(&path, &name, &cancel),
            RefsCommand::List {
                path,
                prefix,
                size,
                from,
            } => commands::refs::list(&path, &prefix, size, from, &cancel, json),
            RefsCommand::Delete { path, name } => commands::refs::delete(&path, &name, &cancel),
        },
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("usage error:") || msg.starts_with("configuration error:")
            {
                EXIT_USAGE
            } else if msg.starts_with("store error:") {
                EXIT_STORE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
