//! Encoder settings shared by the crop, join and overlay commands.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default software video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Hardware video codec swapped in when acceleration is requested
pub const HARDWARE_VIDEO_CODEC: &str = "h264_nvenc";
/// Default video bitrate
pub const DEFAULT_VIDEO_BITRATE: &str = "5M";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "192k";
/// Audio sample rate every package is resampled to
pub const DEFAULT_AUDIO_SAMPLE_RATE: u32 = 48_000;
/// Stereo output
pub const DEFAULT_AUDIO_CHANNELS: u32 = 2;
/// x264 preset
pub const DEFAULT_PRESET: &str = "faster";
/// x264 GOP settings for crop and overlay renders
pub const DEFAULT_X264_PARAMS: &str = "keyint=100:scenecut=0:bframes=2:ref=4";

/// Codec, quality and audio settings for every encode in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EncodingConfig {
    /// Software video codec
    #[serde(default = "default_video_codec")]
    pub codec: String,

    /// Codec used when a stage runs with hardware acceleration
    #[serde(default = "default_hardware_codec")]
    pub hardware_codec: String,

    /// Target video bitrate (e.g., "5M")
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate: String,

    /// Encoding preset (software codec only)
    #[serde(default = "default_preset")]
    pub preset: String,

    /// x264 tune (software codec only)
    #[serde(default = "default_tune")]
    pub tune: String,

    /// H.264 profile and level (software codec only)
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_level")]
    pub level: String,

    /// Audio codec
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,

    /// Audio bitrate
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,

    #[serde(default = "default_sample_rate")]
    pub audio_sample_rate: u32,

    #[serde(default = "default_channels")]
    pub audio_channels: u32,
}

fn default_video_codec() -> String {
    DEFAULT_VIDEO_CODEC.to_string()
}
fn default_hardware_codec() -> String {
    HARDWARE_VIDEO_CODEC.to_string()
}
fn default_video_bitrate() -> String {
    DEFAULT_VIDEO_BITRATE.to_string()
}
fn default_preset() -> String {
    DEFAULT_PRESET.to_string()
}
fn default_tune() -> String {
    "film".to_string()
}
fn default_profile() -> String {
    "high".to_string()
}
fn default_level() -> String {
    "4.1".to_string()
}
fn default_audio_codec() -> String {
    DEFAULT_AUDIO_CODEC.to_string()
}
fn default_audio_bitrate() -> String {
    DEFAULT_AUDIO_BITRATE.to_string()
}
fn default_sample_rate() -> u32 {
    DEFAULT_AUDIO_SAMPLE_RATE
}
fn default_channels() -> u32 {
    DEFAULT_AUDIO_CHANNELS
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            codec: default_video_codec(),
            hardware_codec: default_hardware_codec(),
            video_bitrate: default_video_bitrate(),
            preset: default_preset(),
            tune: default_tune(),
            profile: default_profile(),
            level: default_level(),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
            audio_sample_rate: default_sample_rate(),
            audio_channels: default_channels(),
        }
    }
}

/// Options for one video encode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoEncodeOptions {
    /// Encode with the hardware codec
    pub hardware: bool,
    /// Emit `-b:v`
    pub with_bitrate: bool,
    /// Apply fixed GOP structure (crop and overlay renders)
    pub gop_tuned: bool,
}

impl EncodingConfig {
    /// Software-encoder defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new config with updated video bitrate.
    pub fn with_video_bitrate(mut self, bitrate: impl Into<String>) -> Self {
        self.video_bitrate = bitrate.into();
        self
    }

    /// Video codec arguments.
    ///
    /// Profile, preset and tune are x264 options and are omitted for NVENC.
    pub fn video_args(&self, opts: VideoEncodeOptions) -> Vec<String> {
        let codec = if opts.hardware {
            &self.hardware_codec
        } else {
            &self.codec
        };
        let mut args = vec!["-c:v".to_string(), codec.clone()];

        if opts.with_bitrate {
            args.extend_from_slice(&["-b:v".to_string(), self.video_bitrate.clone()]);
        }
        args.extend_from_slice(&["-pix_fmt".to_string(), "yuv420p".to_string()]);

        if !opts.hardware {
            args.extend_from_slice(&[
                "-profile:v".to_string(),
                self.profile.clone(),
                "-level".to_string(),
                self.level.clone(),
            ]);
            if opts.gop_tuned {
                args.extend_from_slice(&[
                    "-bf".to_string(),
                    "2".to_string(),
                    "-x264-params".to_string(),
                    DEFAULT_X264_PARAMS.to_string(),
                ]);
            }
            args.extend_from_slice(&[
                "-preset".to_string(),
                self.preset.clone(),
                "-tune".to_string(),
                self.tune.clone(),
            ]);
        }

        args
    }

    /// Audio codec arguments.
    pub fn audio_args(&self) -> Vec<String> {
        vec![
            "-c:a".to_string(),
            self.audio_codec.clone(),
            "-b:a".to_string(),
            self.audio_bitrate.clone(),
            "-ar".to_string(),
            self.audio_sample_rate.to_string(),
            "-ac".to_string(),
            self.audio_channels.to_string(),
        ]
    }

    /// Container arguments shared by every package output.
    pub fn container_args(&self) -> Vec<String> {
        vec![
            "-map_metadata".to_string(),
            "0".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EncodingConfig::default();
        assert_eq!(config.codec, "libx264");
        assert_eq!(config.video_bitrate, "5M");
        assert_eq!(config.audio_sample_rate, 48_000);
    }

    #[test]
    fn test_software_video_args() {
        let config = EncodingConfig::default();
        let args = config.video_args(VideoEncodeOptions {
            with_bitrate: true,
            gop_tuned: true,
            ..Default::default()
        });
        assert_eq!(&args[..4], &["-c:v", "libx264", "-b:v", "5M"]);
        assert!(args.contains(&"-x264-params".to_string()));
        assert!(args.contains(&"film".to_string()));
    }

    #[test]
    fn test_hardware_video_args_drop_x264_options() {
        let config = EncodingConfig::default();
        let args = config.video_args(VideoEncodeOptions {
            hardware: true,
            gop_tuned: true,
            ..Default::default()
        });
        assert!(args.contains(&"h264_nvenc".to_string()));
        assert!(!args.contains(&"-preset".to_string()));
        assert!(!args.contains(&"-x264-params".to_string()));
    }

    #[test]
    fn test_audio_args() {
        let args = EncodingConfig::default().audio_args();
        assert_eq!(args, vec!["-c:a", "aac", "-b:a", "192k", "-ar", "48000", "-ac", "2"]);
    }
}
