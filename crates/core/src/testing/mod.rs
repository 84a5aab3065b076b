//! Testing utilities: a scripted stand-in for the extractor binary.
//!
//! The fake is a POSIX shell script that speaks enough of the yt-dlp
//! command line for the executor and the list endpoint. Its behaviour is
//! picked by the identifier prefix:
//!
//! | prefix     | behaviour                                          |
//! |------------|----------------------------------------------------|
//! | `fail`     | prints `ERROR: not found` and exits 1              |
//! | `slow`     | sleeps for 30 seconds                              |
//! | `forks`    | sleeps in a background child, like a helper tool   |
//! | `missing`  | exits 0 without producing a file                   |
//! | `dup`      | produces a file titled `Same Song`                 |
//! | otherwise  | produces `<id>-Track <id>.mp3`                     |
//!
//! # Example
//!
//! ```rust,ignore
//! use mixtape_core::testing::FakeExtractor;
//!
//! let temp = tempfile::TempDir::new()?;
//! let config = FakeExtractor::test_config(temp.path())?;
//! let service = AcquisitionService::new(config);
//! ```

use std::io;
use std::path::{Path, PathBuf};

use crate::config::{Config, JanitorConfig};
use crate::extractor::ExtractorConfig;

const SCRIPT_NAME: &str = "fake-extractor.sh";

const SCRIPT: &str = r#"#!/bin/sh
mode=download
last=""
for a in "$@"; do
  case "$a" in
    --version) echo "fake-extractor 1.0"; exit 0 ;;
    --dump-json) mode=info ;;
  esac
  last="$a"
done

if [ "$mode" = info ]; then
  case "$last" in
    *list=*)
      printf '{"id":"one","title":"First","duration":61}\n'
      printf '{"id":"two","title":"Second","duration":122.5}\n'
      ;;
    *fail*) echo "ERROR: unable to extract" >&2; exit 1 ;;
    *garbage*) echo "this is not json" ;;
    *)
      id="${last##*v=}"
      printf '{"id":"%s","title":"Track %s","duration":42}\n' "$id" "$id"
      ;;
  esac
  exit 0
fi

id="${last##*v=}"
echo "[youtube] $id: Downloading webpage"
case "$id" in
  fail*) echo "ERROR: not found" >&2; exit 1 ;;
  slow*) echo "[info] $id: Downloading 1 format(s): 251"; exec sleep 30 ;;
  missing*) echo "[info] $id: Downloading 1 format(s): 251"; exit 0 ;;
  forks*)
    echo "[info] $id: Downloading 1 format(s): 251"
    sleep 30 &
    echo $! > "$(dirname "$0")/$id.pid"
    wait
    exit 0
    ;;
  dup*) title="Same Song" ;;
  *) title="Track $id" ;;
esac

echo "[info] $id: Downloading 1 format(s): 251"
echo "[download] Destination: $id-$title.webm"
echo "[download]  25.0% of 1.00MiB at 1.00MiB/s ETA 00:01"
echo "[download]  50.0% of 1.00MiB at 1.00MiB/s ETA 00:01"
echo "[download] 100% of 1.00MiB in 00:00:01"
echo "[ExtractAudio] Destination: $id-$title.mp3"
printf 'FAKEAUDIO %s\n' "$id" > "$id-$title.mp3"
exit 0
"#;

/// Scripted extractor binary for tests.
pub struct FakeExtractor;

impl FakeExtractor {
    /// Write the script into `dir` and return its path.
    pub fn install(dir: &Path) -> io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(SCRIPT_NAME);
        std::fs::write(&path, SCRIPT)?;
        Ok(path)
    }

    /// Extractor config that runs `script` through `sh`.
    pub fn config(script: &Path) -> ExtractorConfig {
        ExtractorConfig::with_program("sh", vec![script.display().to_string()]).with_info_timeout(10)
    }

    /// PID of the background child a `forks*` identifier started, once it
    /// has been written next to the script.
    pub fn helper_pid(config: &Config, identifier: &str) -> Option<u32> {
        let script = Path::new(config.extractor.program_args.first()?);
        let pid_file = script.parent()?.join(format!("{}.pid", identifier));
        std::fs::read_to_string(pid_file).ok()?.trim().parse().ok()
    }

    /// Full config rooted at `root`: the script lives in `root/bin`, batch
    /// workspaces in `root/work`, the janitor is off.
    pub fn test_config(root: &Path) -> io::Result<Config> {
        let script = Self::install(&root.join("bin"))?;
        let work = root.join("work");
        std::fs::create_dir_all(&work)?;

        let mut config = Config::default();
        config.acquisition = config
            .acquisition
            .with_temp_dir(work)
            .with_batch_concurrency(2)
            .with_timeout_floor(10);
        config.acquisition.timeout_ms_per_media_second = 0;
        config.extractor = Self::config(&script);
        config.janitor = JanitorConfig {
            enabled: false,
            ..JanitorConfig::default()
        };
        Ok(config)
    }
}
