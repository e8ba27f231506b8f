//! layerkit - build reproducible apk-based image layers without a daemon.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use layerkit::apk::ApkDriver;
use layerkit::artifact::{self, ArchitectureArtifacts, Compression};
use layerkit::build::os_release;
use layerkit::sbom::{self, SbomGenerator, SbomInput};
use layerkit::{config, preflight, Architecture, BuildContext, Builder, ImageConfiguration, Options};

#[derive(Parser)]
#[command(name = "layerkit")]
#[command(about = "Daemonless builder for reproducible apk-based image layers", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build one layer per architecture
    Build(BuildArgs),

    /// Print the configuration with `include` resolved
    ShowConfig {
        /// Configuration file or https:// URL
        config: String,
    },
}

#[derive(Args)]
struct BuildArgs {
    /// Configuration file or https:// URL
    config: String,

    /// Image tags, used for package-version tags and the summary
    tags: Vec<String>,

    /// Directory receiving layers, SBOMs and layers.json
    #[arg(long)]
    output: PathBuf,

    /// Target architecture; repeatable. Also "all" or "host".
    #[arg(long = "arch")]
    archs: Vec<String>,

    /// Keep working directories under DIR/<arch> instead of a temporary one
    #[arg(long)]
    workdir: Option<PathBuf>,

    #[arg(long = "keyring-append")]
    keyring_append: Vec<String>,

    #[arg(long = "repository-append")]
    repository_append: Vec<String>,

    #[arg(long = "package-append")]
    package_append: Vec<String>,

    /// SBOM format; repeatable
    #[arg(long = "sbom-format")]
    sbom_formats: Vec<String>,

    /// Derive extra tags from this package's version
    #[arg(long)]
    package_version_tag: Option<String>,

    /// Also tag every version stem (1.2.3, 1.2, 1)
    #[arg(long)]
    package_version_tag_stem: bool,

    #[arg(long, default_value = "")]
    package_version_tag_prefix: String,

    /// Timestamp pinned on every archive entry; SOURCE_DATE_EPOCH wins
    #[arg(long, default_value_t = 0)]
    source_date_epoch: u64,

    /// Fail instead of emulating foreign architectures
    #[arg(long)]
    no_emulation: bool,

    #[arg(long, default_value = layerkit::context::DEFAULT_EMULATION_WRAPPER)]
    emulation_wrapper: String,

    /// Package manager executable
    #[arg(long, default_value = "apk")]
    apk: String,

    /// gzip or zstd
    #[arg(long, default_value = "gzip")]
    compression: String,
}

impl BuildArgs {
    fn options(&self, arch: Architecture) -> Options {
        let mut options = Options::new(arch);
        options.source_date_epoch = self.source_date_epoch;
        options.tags = self.tags.clone();
        options.emulation.enabled = !self.no_emulation;
        options.emulation.wrapper = self.emulation_wrapper.clone();
        options.sbom_formats = self.sbom_formats.clone();
        options.extra_keys = self.keyring_append.clone();
        options.extra_repos = self.repository_append.clone();
        options.extra_packages = self.package_append.clone();
        options.package_version_tag = self.package_version_tag.clone();
        options.package_version_tag_stem = self.package_version_tag_stem;
        options.package_version_tag_prefix = self.package_version_tag_prefix.clone();
        options.apk = self.apk.clone();
        options
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Build(args) => build(&args),
        Commands::ShowConfig { config } => show_config(&config),
    }
}

fn show_config(location: &str) -> Result<()> {
    let config = config::load(location)?;
    let yaml = serde_yaml::to_string(&config).context("serializing configuration")?;
    print!("{}", yaml);
    Ok(())
}

fn build(args: &BuildArgs) -> Result<()> {
    let config = config::load(&args.config)?;
    let compression: Compression = args.compression.parse()?;
    let generators = sbom::generators_for(&args.sbom_formats)?;
    let archs = target_archs(&args.archs, &config);

    fs::create_dir_all(&args.output)
        .with_context(|| format!("creating output directory '{}'", args.output.display()))?;

    // Held until every architecture is built.
    let _scratch;
    let workdir_root = match &args.workdir {
        Some(dir) => dir.clone(),
        None => {
            let temp = tempfile::Builder::new()
                .prefix("layerkit-")
                .tempdir()
                .context("creating temporary working directory")?;
            let root = temp.path().to_path_buf();
            _scratch = temp;
            root
        }
    };

    let mut summary = Vec::new();
    for arch in archs {
        let options = args.options(arch.clone());
        preflight::check_host_tools(&options)?;

        let workdir = workdir_root.join(arch.to_apk());
        let artifacts = build_arch(&workdir, options, &config, compression, &generators, &args.output)
            .with_context(|| format!("building {}", arch))?;
        summary.push(artifacts);
    }

    let path = artifact::write_summary(&args.output, &summary)?;
    tracing::info!(summary = %path.display(), layers = summary.len(), "build complete");
    Ok(())
}

/// CLI flags win over the configuration; neither means the host.
fn target_archs(cli: &[String], config: &ImageConfiguration) -> Vec<Architecture> {
    if !cli.is_empty() {
        Architecture::parse_all(cli)
    } else if !config.archs.is_empty() {
        Architecture::parse_all(&config.archs)
    } else {
        vec![Architecture::host()]
    }
}

fn build_arch(
    workdir: &Path,
    options: Options,
    config: &ImageConfiguration,
    compression: Compression,
    generators: &[Box<dyn SbomGenerator>],
    output_dir: &Path,
) -> Result<ArchitectureArtifacts> {
    let arch = options.arch.clone();
    let mut ctx = BuildContext::new(workdir, options)?;
    let builder = Builder::new(ApkDriver::new()?);
    let output = builder.build(&mut ctx, config)?;

    let layer_path = output_dir.join(artifact::layer_file_name(&arch, compression));
    let layer = artifact::build_layer(&ctx, &layer_path, compression)?;

    let release = os_release::with_defaults(&output.config.os_release);
    let input = SbomInput {
        os_release: &release,
        arch: &arch,
        packages: &output.packages,
        layer: &layer,
        source_date_epoch: ctx.source_date_epoch(),
    };
    let mut sboms = Vec::new();
    for generator in generators {
        let path = output_dir.join(artifact::sbom_file_name(&arch, generator.extension()));
        generator
            .generate(&input, &path)
            .with_context(|| format!("generating {} SBOM", generator.key()))?;
        sboms.push(path);
    }

    Ok(ArchitectureArtifacts {
        platform: arch.to_platform(),
        architecture: arch,
        layer,
        sboms,
        tags: output.tags,
        run_as: output.run_as,
        packages: output.packages.len(),
    })
}
