//! Encoder configuration

use std::time::Duration;

/// Default encoder program
pub const DEFAULT_PROGRAM: &str = "gst-launch-1.0";

/// What to do when the encoder exits on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    /// Leave the feed stopped until a viewer asks again
    #[default]
    Never,
    /// Relaunch with exponential backoff
    Backoff {
        /// Consecutive restarts before giving up
        max_restarts: u32,
        /// Delay before the first restart
        initial_delay: Duration,
        /// Upper bound for the doubling delay
        max_delay: Duration,
    },
}

impl RestartPolicy {
    /// Delay before restart number `attempt` (starting at 0), or `None` when
    /// no further restart is allowed
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match *self {
            RestartPolicy::Never => None,
            RestartPolicy::Backoff {
                max_restarts,
                initial_delay,
                max_delay,
            } => {
                if attempt >= max_restarts {
                    return None;
                }
                let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                Some(initial_delay.saturating_mul(factor).min(max_delay))
            }
        }
    }
}

/// Encoder launch parameters
///
/// With no custom command, the default GStreamer test pipeline is used.
/// Custom arguments may contain `{fps}`, `{width}`, `{height}` and
/// `{bitrate}` placeholders.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Frames per second; also the key frame interval
    pub frame_rate: u32,

    pub width: u32,

    pub height: u32,

    /// Target bitrate in kbit/s
    pub bitrate: u32,

    /// Program to run
    pub program: String,

    /// Argument template; `None` selects the default pipeline
    pub args: Option<Vec<String>>,

    pub restart_policy: RestartPolicy,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            width: 960,
            height: 540,
            bitrate: 2500,
            program: DEFAULT_PROGRAM.to_string(),
            args: None,
            restart_policy: RestartPolicy::Never,
        }
    }
}

impl EncoderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the frame rate (minimum 1)
    pub fn frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = fps.max(1);
        self
    }

    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the target bitrate in kbit/s
    pub fn bitrate(mut self, kbps: u32) -> Self {
        self.bitrate = kbps;
        self
    }

    /// Replace the encoder command
    ///
    /// Any program that writes an Annex-B H.264 stream to stdout works.
    pub fn command<I, S>(mut self, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.program = program.into();
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    pub fn restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    /// Arguments passed to the program
    pub fn command_args(&self) -> Vec<String> {
        match &self.args {
            Some(args) => args.iter().map(|arg| self.expand(arg)).collect(),
            None => self.default_pipeline(),
        }
    }

    /// Program and arguments as one line, for logging
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in self.command_args() {
            line.push(' ');
            line.push_str(&arg);
        }
        line
    }

    fn expand(&self, template: &str) -> String {
        template
            .replace("{fps}", &self.frame_rate.to_string())
            .replace("{width}", &self.width.to_string())
            .replace("{height}", &self.height.to_string())
            .replace("{bitrate}", &self.bitrate.to_string())
    }

    fn default_pipeline(&self) -> Vec<String> {
        let caps = format!(
            "video/x-h264,width={},height={},framerate={}/1,profile=baseline",
            self.width, self.height, self.frame_rate
        );
        vec![
            "-q".to_string(),
            "videotestsrc".to_string(),
            "pattern=ball".to_string(),
            "is-live=true".to_string(),
            "!".to_string(),
            "x264enc".to_string(),
            "speed-preset=ultrafast".to_string(),
            format!("key-int-max={}", self.frame_rate),
            format!("bitrate={}", self.bitrate),
            "!".to_string(),
            caps,
            "!".to_string(),
            "h264parse".to_string(),
            "!".to_string(),
            "video/x-h264,stream-format=byte-stream".to_string(),
            "!".to_string(),
            "fdsink".to_string(),
        ]
    }
}
