use std::path::PathBuf;

use clap::Parser;
use steadycast_engine::descriptor::DEMO_CHANNEL_ID;

use crate::script::FaultScript;

#[derive(Parser, Debug)]
#[command(
    name = "steadycast",
    author,
    version,
    about = "Simulate a resilient live stream player",
    long_about = "Runs the playback controller against an in-process engine and sink, \
                  injects scripted faults and prints every published player state as \
                  a JSON line on stdout."
)]
pub struct Args {
    /// Stream descriptor as inline JSON or a path to a JSON file
    #[arg(long, value_name = "JSON|FILE", conflicts_with_all = ["source", "event_id"])]
    pub descriptor: Option<String>,

    /// HTTP endpoint returning the channel list as JSON
    #[arg(long, value_name = "URL")]
    pub source: Option<String>,

    /// Channel to open
    #[arg(short, long, default_value = DEMO_CHANNEL_ID)]
    pub channel: String,

    /// Event id passed along with the channel request
    #[arg(long)]
    pub event_id: Option<u64>,

    /// Player configuration file (JSON)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Faults to inject, e.g. `net@3,media@5,other@9,stall@12`
    #[arg(long, value_name = "SCRIPT", default_value = "")]
    pub faults: FaultScript,

    /// Seconds to run before stopping
    #[arg(short, long, default_value_t = 30.0)]
    pub duration: f64,

    /// Reject the first play request, as a browser without a user gesture does
    #[arg(long)]
    pub autoplay_blocked: bool,

    /// Play through the sink's native decoder instead of the adaptive engine
    #[arg(long)]
    pub native: bool,

    /// Read player commands from the keyboard
    #[arg(short, long)]
    pub interactive: bool,

    /// Log filter directive, overrides RUST_LOG
    #[arg(long, value_name = "FILTER")]
    pub log_level: Option<String>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["steadycast"]).unwrap();
        assert_eq!(args.channel, DEMO_CHANNEL_ID);
        assert!(args.faults.is_empty());
        assert_eq!(args.duration, 30.0);
        assert!(!args.native);
    }

    #[test]
    fn test_descriptor_conflicts_with_source() {
        let result = Args::try_parse_from([
            "steadycast",
            "--descriptor",
            "{}",
            "--source",
            "http://localhost/channels",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_fault_script_is_parsed() {
        let args = Args::try_parse_from(["steadycast", "--faults", "net@1,other@2"]).unwrap();
        assert_eq!(args.faults.faults().len(), 2);
        assert!(Args::try_parse_from(["steadycast", "--faults", "net"]).is_err());
    }
}
