// kiln-core/src/build/template.rs
// Placeholder expansion for formula strings. Expansion is total: a brace
// group that is not a known placeholder is copied through unchanged.

use std::path::{Path, PathBuf};

use kiln_common::config::Config;

pub struct TemplateContext<'a> {
    prefix: &'a Path,
    config: &'a Config,
}

impl<'a> TemplateContext<'a> {
    pub fn new(prefix: &'a Path, config: &'a Config) -> Self {
        Self { prefix, config }
    }

    fn lookup(&self, key: &str) -> Option<PathBuf> {
        match key {
            "prefix" => Some(self.prefix.to_path_buf()),
            "bin" | "lib" | "include" | "share" | "libexec" | "sbin" => {
                Some(self.prefix.join(key))
            }
            _ => {
                let (kind, arg) = key.split_once(':')?;
                if arg.is_empty() {
                    return None;
                }
                match kind {
                    "opt" => Some(self.config.formula_opt_path(arg)),
                    "fixture" => Some(self.config.fixture_path(arg)),
                    _ => None,
                }
            }
        }
    }

    pub fn expand(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let Some(close) = after.find('}') else {
                out.push_str(&rest[open..]);
                return out;
            };
            let key = &after[..close];
            match self.lookup(key) {
                Some(path) => out.push_str(&path.to_string_lossy()),
                None => {
                    out.push('{');
                    out.push_str(key);
                    out.push('}');
                }
            }
            rest = &after[close + 1..];
        }
        out.push_str(rest);
        out
    }

    pub fn expand_all(&self, inputs: &[String]) -> Vec<String> {
        inputs.iter().map(|s| self.expand(s)).collect()
    }
}
