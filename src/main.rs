//! Basemap tiles CLI
//!
//! Renders reprojected map images from tiled layers and manages the tile store.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use basemap_tiles::crs::{project_bounds, ProjectionRegistry};
use basemap_tiles::index::TileKey;
use basemap_tiles::io::{load_tile_directory, ObjectTileStore};
use basemap_tiles::transform::{BoundingBox, MapRequest};
use basemap_tiles::{build_runtime, build_service, init_rayon, warm_cache, Config, SchedulerConfig};

#[derive(Parser)]
#[command(name = "basemap-tiles")]
#[command(about = "Render reprojected basemaps from a tiled mosaic", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Override concurrency level
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render one map image as raw big-endian ARGB pixels
    Render {
        /// Layer to render
        #[arg(short, long)]
        layer: String,

        /// Extent in the target CRS: min_x,min_y,max_x,max_y
        #[arg(long, default_value = "-180,-90,180,90", allow_hyphen_values = true)]
        bbox: String,

        /// Target CRS code
        #[arg(long, default_value = "EPSG:4326")]
        crs: String,

        /// Treat --bbox as lon/lat degrees and project it into the target CRS
        #[arg(long)]
        lon_lat: bool,

        #[arg(long, default_value_t = 256)]
        width: usize,

        #[arg(long, default_value_t = 256)]
        height: usize,

        /// Output path for the pixel data
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Render a lon/lat tile pyramid and report render and cache statistics
    Bench {
        /// Layer to render
        #[arg(short, long)]
        layer: String,

        /// Pyramid levels, starting from the two hemispheres
        #[arg(long, default_value_t = 3)]
        levels: usize,

        /// Side length of each rendered tile
        #[arg(long, default_value_t = 256)]
        tile_size: usize,
    },

    /// Load a directory of tile files into the durable store
    Load {
        /// Directory holding <key>.<extension> files
        directory: PathBuf,
    },

    /// Describe a tile key or tile file name
    Key {
        key: String,
    },

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            layer,
            bbox,
            crs,
            lon_lat,
            width,
            height,
            output,
        } => {
            let mut bbox = parse_bbox(&bbox)?;
            if lon_lat {
                bbox = project_lon_lat_bbox(&bbox, &crs)?;
            }
            let request = MapRequest::new(width, height, bbox, crs);
            render_command(load_config(&cli.config, cli.concurrency)?, layer, request, output)?;
        }

        Commands::Bench {
            layer,
            levels,
            tile_size,
        } => {
            bench_command(load_config(&cli.config, cli.concurrency)?, layer, levels, tile_size)?;
        }

        Commands::Load { directory } => {
            load_command(load_config(&cli.config, cli.concurrency)?, directory)?;
        }

        Commands::Key { key } => {
            key_command(&key)?;
        }

        Commands::Validate => {
            validate_command(cli.config)?;
        }

        Commands::GenerateConfig { output } => {
            generate_config_command(output)?;
        }
    }

    Ok(())
}

fn load_config(config_path: &PathBuf, concurrency: Option<usize>) -> Result<Config> {
    let mut config = Config::from_file(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    // Apply overrides
    if let Some(c) = concurrency {
        config.render.concurrency = c;
    }

    config.validate()?;
    init_rayon(config.render.rayon_threads)?;
    Ok(config)
}

/// Parse `min_x,min_y,max_x,max_y`.
fn parse_bbox(value: &str) -> Result<BoundingBox> {
    let values = value
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("Invalid bbox '{}'", value))?;
    Ok(BoundingBox::from_slice(&values)?)
}

/// Project a lon/lat extent into `crs` by sampling its edges.
fn project_lon_lat_bbox(bbox: &BoundingBox, crs: &str) -> Result<BoundingBox> {
    let projection = ProjectionRegistry::default().get(crs)?;
    let bounds = project_bounds(&bbox.to_array(), &projection, 21)?;
    Ok(BoundingBox::try_from(bounds)?)
}

fn render_command(config: Config, layer: String, request: MapRequest, output: PathBuf) -> Result<()> {
    let runtime = build_runtime(config.render.worker_threads)?;

    runtime.block_on(async {
        let service = build_service(&config)?;
        let image = service.render(&[layer.as_str()], &request).await?;
        service.dispose();

        tokio::fs::write(&output, image.to_be_bytes()).await?;
        println!(
            "Wrote {}x{} ARGB image to {}",
            request.width,
            request.height,
            output.display()
        );
        Ok(())
    })
}

fn bench_command(config: Config, layer: String, levels: usize, tile_size: usize) -> Result<()> {
    let runtime = build_runtime(config.render.worker_threads)?;
    let scheduler_config = SchedulerConfig::from_config(&config, levels, tile_size);

    let stats = runtime.block_on(async {
        let service = build_service(&config)?;
        let stats = warm_cache(service.clone(), &layer, scheduler_config).await;
        println!("{}", service.metrics().snapshot());
        service.dispose();
        stats
    })?;

    println!("{}", stats);
    if stats.tiles_failed > 0 {
        anyhow::bail!("{} of {} tiles failed to render", stats.tiles_failed, stats.total_tiles);
    }
    Ok(())
}

fn load_command(config: Config, directory: PathBuf) -> Result<()> {
    let runtime = build_runtime(config.render.worker_threads)?;

    runtime.block_on(async {
        let store = ObjectTileStore::from_config(&config.store, &config.retry)?;
        let count = load_tile_directory(&store, &directory, &config.store.extension).await?;
        println!("Loaded {} tiles into {}", count, config.store.path_display());
        Ok(())
    })
}

fn key_command(key: &str) -> Result<()> {
    let key = TileKey::from_file_name(key)?;
    println!("Parent: {}", key.parent);
    println!("Parent size: {}x{}", key.parent_width, key.parent_height);
    println!("Origin: ({}, {})", key.x, key.y);
    println!("Tile size: {}x{} ({} bytes)", key.width, key.height, key.byte_len());
    Ok(())
}

fn validate_command(config_path: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    config.validate()?;
    println!("Configuration is valid ({} layers)", config.layers.len());
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    // Generate a commented YAML config
    let yaml = r#"# Basemap Tiles Configuration

# === LAYERS: Source rasters that can be requested ===
layers:
  - name: "bluemarble"
    # Full raster size in pixels
    width: 86400
    height: 43200

    # Extent in the layer's CRS [min_x, min_y, max_x, max_y]
    bbox: [-180.0, -90.0, 180.0, 90.0]

    # Native projection of the layer
    crs: "EPSG:4326"

    # Tiles live in the durable store under keys derived from the layer name
    source:
      type: tiles

  # A layer served from local strip files instead of the tile store
  # - name: "preview"
  #   width: 8640
  #   height: 4320
  #   source:
  #     type: strips
  #     directory: "/data/preview"

# === STORE: Where tiles are kept ===
# Choose ONE of: local_path (local disk) OR bucket+prefix (S3)
store:
  # Option 1: Local filesystem
  local_path: "/tmp/basemap-tiles"

  # Option 2: S3 (comment out local_path and uncomment these)
  # bucket: "tile-bucket"
  # prefix: "tiles/bluemarble"
  # region: "us-west-2"

  # Custom S3 endpoint (for LocalStack, MinIO, etc.)
  # endpoint_url: "http://localhost:4566"

  # Tile object extension
  extension: "tile"

# === CACHE: Tile layout and the in-memory tier ===
cache:
  # In-memory tile budget in MB (0 disables)
  fast_tier_mb: 256

  # Tile dimensions; one tile must fit in max_tile_bytes
  max_tile_width: 500
  max_tile_height: 500
  max_tile_bytes: 1000000

  # Tiles fetched concurrently per request
  fetch_concurrency: 8

# === RENDER: Request limits and performance tuning ===
render:
  # Largest accepted image width or height
  max_image_size: 512

  # Concurrent renders during bench runs
  concurrency: 16

  # Tokio async worker threads (null = num CPUs)
  # worker_threads: 8

  # Rayon thread pool size for CPU work (null = num CPUs)
  # rayon_threads: 8

  # Print metrics during bench runs
  enable_metrics: true
  metrics_interval_secs: 10

# === RETRY: Durable store reads ===
retry:
  max_retries: 3
  initial_backoff_ms: 100
  max_backoff_ms: 10000
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_render() {
        let cli = Cli::try_parse_from([
            "basemap-tiles",
            "render",
            "-l",
            "bluemarble",
            "--bbox",
            "-180,-90,0,90",
            "-o",
            "out.argb",
        ])
        .unwrap();
        match cli.command {
            Commands::Render {
                layer, bbox, width, ..
            } => {
                assert_eq!(layer, "bluemarble");
                assert_eq!(width, 256);
                assert_eq!(parse_bbox(&bbox).unwrap().to_array(), [-180.0, -90.0, 0.0, 90.0]);
            }
            _ => panic!("expected render"),
        }
    }

    #[test]
    fn test_cli_parse_bench() {
        let cli = Cli::try_parse_from(["basemap-tiles", "bench", "-l", "bluemarble", "--levels", "2"]).unwrap();
        match cli.command {
            Commands::Bench { layer, levels, tile_size } => {
                assert_eq!(layer, "bluemarble");
                assert_eq!(levels, 2);
                assert_eq!(tile_size, 256);
            }
            _ => panic!("expected bench"),
        }
        assert!(Cli::try_parse_from(["basemap-tiles", "warm", "-l", "bluemarble"]).is_err());
    }

    #[test]
    fn test_cli_parse_with_config() {
        let cli = Cli::try_parse_from(["basemap-tiles", "-c", "other.yaml", "validate"]);
        assert!(cli.is_ok());
        assert_eq!(cli.unwrap().config, PathBuf::from("other.yaml"));
    }

    #[test]
    fn test_cli_parse_validate() {
        let cli = Cli::try_parse_from(["basemap-tiles", "validate", "-c", "test.json"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["basemap-tiles"]).is_err());
        assert!(Cli::try_parse_from(["basemap-tiles", "render", "-o", "x"]).is_err());
    }

    #[test]
    fn test_parse_bbox() {
        assert!(parse_bbox("1,2,3").is_err());
        assert!(parse_bbox("a,b,c,d").is_err());
        assert!(parse_bbox("10,0,0,10").is_err());
        assert_eq!(parse_bbox(" 0, 1, 2, 3").unwrap().max_y(), 3.0);
    }

    #[test]
    fn test_project_lon_lat_bbox() {
        let bbox = parse_bbox("-10,40,5,50").unwrap();
        let same = project_lon_lat_bbox(&bbox, "EPSG:4326").unwrap();
        assert_eq!(same.to_array(), bbox.to_array());

        let polar = parse_bbox("-180,60,180,90").unwrap();
        let projected = project_lon_lat_bbox(&polar, "EPSG:32661").unwrap();
        assert!(projected.min_x() < 2_000_000.0 && projected.max_x() > 2_000_000.0);
        assert!(project_lon_lat_bbox(&bbox, "EPSG:9999").is_err());
    }

    #[test]
    fn test_generated_config_is_valid() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        generate_config_command(path.clone()).unwrap();

        let config = Config::from_file(&path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.layers[0].name, "bluemarble");
    }
}
