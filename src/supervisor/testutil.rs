//! Fake interpreter and package manager scripts for process tests.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::supervisor::environment::Interpreter;

/// Write an executable `/bin/sh` script.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn line_count(path: &Path) -> usize {
    std::fs::read_to_string(path)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

pub struct FakeRuntime {
    pub bin: PathBuf,
    pub work: PathBuf,
    pub interpreter: Interpreter,
    pub install_counter: PathBuf,
}

/// A `node` that answers `--version` and otherwise runs its argument as a
/// shell script, plus an `npm` whose `install` creates `node_modules` and
/// whose `ci` fails.
pub fn fake_runtime(root: &Path) -> FakeRuntime {
    let bin = root.join("bin");
    let work = root.join("work");
    std::fs::create_dir_all(&bin).unwrap();
    std::fs::create_dir_all(&work).unwrap();
    let install_counter = root.join("installs");

    let node = write_script(
        &bin,
        "node",
        "if [ \"$1\" = \"--version\" ]; then echo v20.11.1; exit 0; fi\nexec /bin/sh \"$@\"\n",
    );
    write_script(
        &bin,
        "npm",
        &format!(
            "case \"$1\" in\n\
             install)\n\
             echo run >> '{counter}'\n\
             echo 'added 42 packages'\n\
             echo 'warn deprecated' >&2\n\
             echo \"PATH=$PATH\"\n\
             mkdir -p node_modules\n\
             exit 0 ;;\n\
             *) echo 'npm ERR! unsupported' >&2; exit 1 ;;\n\
             esac\n",
            counter = install_counter.display()
        ),
    );

    FakeRuntime {
        bin,
        work,
        interpreter: Interpreter {
            path: node,
            version: "v20.11.1".to_string(),
        },
        install_counter,
    }
}
