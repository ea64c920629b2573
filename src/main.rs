use clap::{Parser, Subcommand, ValueEnum};
use cosmo_convert::cloud::sync::{CloudFeed, upload_item};
use cosmo_convert::cloud::{CloudStore, SupabaseClient};
use cosmo_convert::config::{self, AppConfig, ConfigOverrides};
use cosmo_convert::convert::{ConvertEvent, Converter, ItemId, UploadOutcome};
use cosmo_convert::gallery::{self, FsGalleryStore, GalleryStore};
use cosmo_convert::imaging::{OutputFormat, ResizeMode, RustBackend, is_supported_input};
use cosmo_convert::output;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup — trivial, called exactly once
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "cosmo-convert")]
#[command(about = "Convert images to WebP/AVIF, keep a local gallery, sync to the cloud")]
#[command(long_about = "\
Convert images to WebP/AVIF, keep a local gallery, sync to the cloud

Images are resized and re-encoded one at a time. A failed image is reported
and the batch moves on. Converted images can be written to a directory,
saved to the local gallery, or uploaded to a Supabase-compatible backend.

Resize modes:
  keep         native dimensions
  percentage   both axes scaled by --percentage
  explicit     --width and/or --height; aspect ratio kept unless --stretch

Cloud credentials come from the config file or from the COSMO_CLOUD_URL and
COSMO_CLOUD_ANON_KEY environment variables.

Run 'cosmo-convert gen-config' to generate a documented config file.")]
#[command(version = version_string())]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert image files
    Convert(ConvertArgs),
    /// Browse the local gallery
    #[command(subcommand)]
    Gallery(GalleryCommand),
    /// Browse the cloud gallery
    #[command(subcommand)]
    Cloud(CloudCommand),
    /// Print a stock config file with all options documented
    GenConfig,
}

#[derive(clap::Args)]
struct ConvertArgs {
    /// Images to convert; unsupported file types are skipped
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Target format: webp, avif, jpeg, png
    #[arg(long)]
    format: Option<OutputFormat>,

    /// Lossy quality, 1-100
    #[arg(long)]
    quality: Option<u32>,

    /// Encode losslessly
    #[arg(long)]
    lossless: bool,

    #[arg(long, value_enum)]
    resize: Option<ResizeArg>,

    /// Target width in pixels (explicit mode)
    #[arg(long)]
    width: Option<u32>,

    /// Target height in pixels (explicit mode)
    #[arg(long)]
    height: Option<u32>,

    /// Scale factor in percent (percentage mode)
    #[arg(long)]
    percentage: Option<f64>,

    /// Use width and height exactly instead of fitting inside them
    #[arg(long)]
    stretch: bool,

    /// Write converted images here (the current directory when neither
    /// --save nor --upload is given)
    #[arg(long)]
    out: Option<PathBuf>,

    /// Save converted images to the local gallery
    #[arg(long)]
    save: bool,

    /// Upload converted images to the cloud
    #[arg(long)]
    upload: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ResizeArg {
    Keep,
    Percentage,
    Explicit,
}

impl From<ResizeArg> for ResizeMode {
    fn from(arg: ResizeArg) -> Self {
        match arg {
            ResizeArg::Keep => ResizeMode::Keep,
            ResizeArg::Percentage => ResizeMode::Percentage,
            ResizeArg::Explicit => ResizeMode::Explicit,
        }
    }
}

#[derive(Subcommand)]
enum GalleryCommand {
    /// List saved images, newest first
    List,
    /// Write a saved image to a directory
    Export {
        id: String,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Delete a saved image
    Delete { id: String },
}

#[derive(Subcommand)]
enum CloudCommand {
    /// List uploaded images, newest first
    List,
    /// Delete an uploaded image and its record
    Delete { id: String },
    /// List uploaded images, then print new ones as they arrive
    Watch,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(config::default_config_path);

    match cli.command {
        Command::Convert(args) => {
            let app_config = config::load_config_with(&config_path, &args.overrides())?;
            run_convert(&app_config, args)?;
        }
        Command::Gallery(cmd) => {
            let app_config = config::load_config(&config_path)?;
            let store = FsGalleryStore::open(app_config.gallery_dir()?)?;
            match cmd {
                GalleryCommand::List => output::print_gallery_list(&store.list()?),
                GalleryCommand::Export { id, out } => {
                    let path = gallery::export(&store, &id, &out)?;
                    println!("Exported {}", path.display());
                }
                GalleryCommand::Delete { id } => {
                    store.delete(&id)?;
                    println!("Deleted {id}");
                }
            }
        }
        Command::Cloud(cmd) => {
            let app_config = config::load_config(&config_path)?;
            let client = SupabaseClient::new(&app_config.cloud)?;
            match cmd {
                CloudCommand::List => output::print_cloud_list(&client.list()?),
                CloudCommand::Delete { id } => {
                    let mut feed = CloudFeed::new();
                    feed.refresh(&client)?;
                    let record = feed.delete(&client, &id)?;
                    println!("Deleted {} ({id})", record.original_name);
                }
                CloudCommand::Watch => watch_cloud(&client)?,
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

impl ConvertArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            format: self.format,
            quality: self.quality,
            lossless: self.lossless,
            mode: self.resize.map(Into::into),
            width: self.width,
            height: self.height,
            percentage: self.percentage,
            stretch: self.stretch,
        }
    }
}

fn run_convert(app_config: &AppConfig, args: ConvertArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Open destinations up front so a bad setup fails before any encoding.
    let store = if args.save {
        Some(FsGalleryStore::open(app_config.gallery_dir()?)?)
    } else {
        None
    };
    let client = if args.upload {
        Some(SupabaseClient::new(&app_config.cloud)?)
    } else {
        None
    };
    let out = match (&args.out, args.save || args.upload) {
        (Some(dir), _) => Some(dir.clone()),
        (None, false) => Some(PathBuf::from(".")),
        (None, true) => None,
    };

    let (tx, rx) = std::sync::mpsc::channel();
    let mut converter =
        Converter::new(RustBackend::new(), app_config.convert_settings()).with_events(tx);

    let mut problems = 0;
    for path in &args.files {
        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        if !is_supported_input(&name) {
            println!("Skipping {} (not a supported image type)", path.display());
            continue;
        }
        if let Err(e) = converter.add_file(path) {
            eprintln!("Skipping {}: {e}", path.display());
            problems += 1;
        }
    }

    let printer = std::thread::spawn(move || {
        for event in rx {
            for line in output::format_convert_event(&event) {
                println!("{}", line);
            }
            if matches!(event, ConvertEvent::BatchFinished(_)) {
                break;
            }
        }
    });
    let summary = converter.convert_pending();
    printer.join().map_err(|_| "progress printer panicked")?;
    problems += summary.failed;

    let mut uploadable = Vec::new();
    for delivery in converter.deliver(out.as_deref(), store.as_ref()) {
        for line in output::format_delivery(&delivery) {
            println!("{}", line);
        }
        for line in output::format_delivery_errors(&delivery) {
            eprintln!("{}", line);
        }
        if delivery.failed() {
            problems += 1;
        }
        uploadable.push(delivery.id);
    }

    if let Some(client) = &client {
        for id in uploadable {
            if !upload(&mut converter, client, id)? {
                problems += 1;
            }
        }
    }

    if problems > 0 {
        return Err(format!("Finished with {problems} error(s)").into());
    }
    Ok(())
}

/// Upload one item; `false` when the upload failed and was reported.
fn upload(
    converter: &mut Converter<RustBackend>,
    client: &SupabaseClient,
    id: ItemId,
) -> Result<bool, Box<dyn std::error::Error>> {
    let ticket = converter.begin_upload(id)?;
    match upload_item(client, &ticket.name, ticket.format, &ticket.bytes) {
        Ok(record) => {
            if converter.finish_upload(&ticket, &record.url) == UploadOutcome::Stale {
                tracing::warn!(item = %id, "item changed during upload");
            }
            println!("Uploaded {}: {}", ticket.name, record.url);
            Ok(true)
        }
        Err(e) => {
            converter.abort_upload(&ticket);
            eprintln!("Upload failed for {}: {e}", ticket.name);
            Ok(false)
        }
    }
}

fn watch_cloud(client: &SupabaseClient) -> Result<(), Box<dyn std::error::Error>> {
    let mut feed = CloudFeed::new();
    feed.refresh(client)?;
    output::print_cloud_list(feed.records());

    let (tx, rx) = std::sync::mpsc::channel();
    let _subscription = client.subscribe_inserts(move |record| {
        let _ = tx.send(record);
    })?;
    println!("Watching for uploads (Ctrl-C to stop)");

    // Ends when the subscription thread exits and drops the sender.
    for record in rx {
        if feed.insert(record.clone()) {
            println!("{}", output::format_cloud_insert(&record));
        }
    }
    Ok(())
}
