//! A stand-in for the container engine CLI. `create` records the mount and
//! image under the container name, `start` replays them and interprets the
//! submitted source as a tiny line language:
//!
//! - `print <text>` writes `<text>` to stdout
//! - `warn <text>` writes `<text>` to stderr
//! - `exit <n>` sets the exit code
//! - `echo-stdin` copies the program's stdin to stdout
//! - `print-image`, `print-mount`, `print-source-name` report how the run was wired
//! - `sleep` blocks far past any test deadline
//!
//! Images named `missing-*` fail `image inspect`, `broken-*` fail `create`
//! with exit 125 and `hang-*` never answer `image inspect`.

use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

use crate::config::Config;
use crate::execution::Executor;

const SCRIPT: &str = r#"
if [ -e "$DAEMON_DOWN" ]; then
  echo "Cannot connect to the Docker daemon at unix:///var/run/docker.sock. Is the docker daemon running?" >&2
  exit 1
fi

cmd="$1"
shift
case "$cmd" in
  image)
    case "$2" in
      missing-*) echo "Error: No such image: $2" >&2; exit 1 ;;
      hang-*) exec sleep 30 ;;
    esac
    exit 0
    ;;
  rm)
    echo "$2" >> "$REMOVED_LOG"
    exit 0
    ;;
  create)
    name=""
    mount=""
    image=""
    while [ $# -gt 0 ]; do
      case "$1" in
        --name) name="$2"; shift 2 ;;
        -v) mount="$2"; shift 2 ;;
        --network|--memory|--cpus|--pids-limit|--pull) shift 2 ;;
        -*) shift ;;
        *) image="$1"; shift ;;
      esac
    done
    case "$image" in
      broken-*) echo "docker: Error response from daemon: boom." >&2; exit 125 ;;
    esac
    printf '%s\n%s\n' "$mount" "$image" > "$CONTAINERS/$name"
    echo "$name"
    exit 0
    ;;
  start) ;;
  *) exit 0 ;;
esac

name=""
for arg in "$@"; do name="$arg"; done
{ IFS= read -r mount; IFS= read -r image; } < "$CONTAINERS/$name"

exec 3<&0
dir="${mount%%:*}"
src=""
for f in "$dir"/*; do src="$f"; done

status=0
while IFS= read -r line || [ -n "$line" ]; do
  case "$line" in
    "print "*) printf '%s\n' "${line#print }" ;;
    "warn "*) printf '%s\n' "${line#warn }" >&2 ;;
    "exit "*) status="${line#exit }" ;;
    echo-stdin) cat <&3 ;;
    print-image) printf '%s\n' "$image" ;;
    print-mount) printf '%s\n' "$mount" ;;
    print-source-name) printf '%s\n' "${src##*/}" ;;
    sleep) exec sleep 30 ;;
  esac
done < "$src"
exit "$status"
"#;

pub(crate) struct FakeRuntime {
    dir: TempDir,
    script: PathBuf,
    removed_log: PathBuf,
    daemon_down: PathBuf,
}

impl FakeRuntime {
    pub(crate) fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let removed_log = dir.path().join("removed.log");
        let daemon_down = dir.path().join("daemon-down");
        let containers = dir.path().join("containers");
        fs::create_dir(&containers).unwrap();
        let script = dir.path().join("fake-engine.sh");
        let header = format!(
            "REMOVED_LOG='{}'\nDAEMON_DOWN='{}'\nCONTAINERS='{}'\n",
            removed_log.display(),
            daemon_down.display(),
            containers.display()
        );
        fs::write(&script, header + SCRIPT).unwrap();
        Self {
            dir,
            script,
            removed_log,
            daemon_down,
        }
    }

    /// Config that routes every engine call through the script via `/bin/sh`.
    pub(crate) fn config(&self) -> Config {
        let mut config = Config::default();
        config.runtime.executable = "/bin/sh".to_string();
        config.runtime.global_args = vec![self.script.display().to_string()];
        config.workspace.root = self.dir.path().join("temp");
        config
    }

    pub(crate) fn executor(&self, adjust: impl FnOnce(&mut Config)) -> Executor {
        let mut config = self.config();
        adjust(&mut config);
        config.validate().unwrap();
        Executor::new(&config).unwrap()
    }

    pub(crate) fn removed_containers(&self) -> Vec<String> {
        fs::read_to_string(&self.removed_log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Every later engine call fails the way a CLI without a daemon does.
    pub(crate) fn stop_daemon(&self) {
        fs::write(&self.daemon_down, "").unwrap();
    }
}
