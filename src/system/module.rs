//! Kernel module loading.

use log::debug;

use super::command::Runner;
use super::command_error::CommandError;
use crate::constants;

/// Ensures a kernel capability is loaded before devices are attached.
pub struct ModuleLoader<'a> {
    runner: &'a dyn Runner,
}

impl<'a> ModuleLoader<'a> {
    pub fn new(runner: &'a dyn Runner) -> Self {
        Self { runner }
    }

    /// Returns the names of the currently loaded modules.
    pub fn loaded(&self) -> Result<Vec<String>, CommandError> {
        let out = self.runner.call(constants::LSMOD, &[])?;
        Ok(parse_lsmod(&out))
    }

    /// Loads `module` with `params` unless it is already present.
    ///
    /// Calling this repeatedly is harmless: a loaded module is left untouched.
    pub fn ensure(&self, module: &str, params: &[&str]) -> Result<(), CommandError> {
        if self.loaded()?.iter().any(|name| name == module) {
            debug!("module {module} already loaded");
            return Ok(());
        }

        let mut args = vec![module];
        args.extend_from_slice(params);
        self.runner.call(constants::MODPROBE, &args)?;
        debug!("module {module} loaded");
        Ok(())
    }
}

/// Extracts module names from `lsmod` output, skipping the header line.
fn parse_lsmod(out: &str) -> Vec<String> {
    out.lines()
        .filter(|line| !line.starts_with("Module"))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::command::Output;
    use std::cell::RefCell;

    struct Scripted {
        lsmod: &'static str,
        calls: RefCell<Vec<String>>,
    }

    impl Runner for Scripted {
        fn run(&self, program: &str, args: &[&str]) -> Result<Output, CommandError> {
            self.calls
                .borrow_mut()
                .push(format!("{program} {}", args.join(" ")));
            let stdout = match program {
                "lsmod" => self.lsmod.to_string(),
                _ => String::new(),
            };
            Ok(Output {
                stdout,
                ..Output::default()
            })
        }
    }

    #[test]
    fn parse_lsmod_skips_header() {
        let out = "Module                  Size  Used by\nnbd                    65536  0\nloop 40960 2\n";
        assert_eq!(parse_lsmod(out), vec!["nbd", "loop"]);
    }

    #[test]
    fn ensure_loads_missing_module() {
        let runner = Scripted {
            lsmod: "Module Size Used by\nloop 40960 2\n",
            calls: RefCell::new(vec![]),
        };
        ModuleLoader::new(&runner)
            .ensure("nbd", &["max_part=16"])
            .unwrap();
        assert_eq!(
            runner.calls.borrow().as_slice(),
            &["lsmod ".to_string(), "modprobe nbd max_part=16".to_string()]
        );
    }

    #[test]
    fn ensure_skips_loaded_module() {
        let runner = Scripted {
            lsmod: "Module Size Used by\nnbd 65536 0\n",
            calls: RefCell::new(vec![]),
        };
        ModuleLoader::new(&runner).ensure("nbd", &[]).unwrap();
        assert_eq!(runner.calls.borrow().len(), 1);
    }
}
