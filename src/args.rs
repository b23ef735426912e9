use clap::Parser;
use std::path::PathBuf;

use mjpeg_player::config;

#[derive(Parser, Debug)]
#[command(name = "mjpeg-player")]
#[command(version)]
#[command(about = "Live MJPEG player core streaming transcoded frames over WebSocket", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/mjpeg-player.toml")]
    pub config: PathBuf,

    /// HTTP bind address
    #[arg(long)]
    pub host: Option<String>,

    /// HTTP port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// JPEG quality (1-100)
    #[arg(short, long)]
    pub quality: Option<u8>,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,
}

impl Args {
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        config::Config::load(&self.config)
    }

    /// Apply command line overrides on top of the loaded file
    pub fn apply(&self, config: &mut config::Config) {
        if let Some(ref host) = self.host {
            config.http.host = host.clone();
        }
        if let Some(port) = self.port {
            config.http.port = port;
        }
        if let Some(quality) = self.quality {
            config.encoding.jpeg_quality = quality;
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
    }
}
