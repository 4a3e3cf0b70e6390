// kiln/src/cli/info.rs
//! Contains the logic for the `info` command.

use clap::Args;
use colored::Colorize;
use kiln_common::config::Config;
use kiln_common::dependency::{Dependency, DependencyExt};
use kiln_common::error::Result;
use kiln_common::formulary::Formulary;
use kiln_common::keg::KegRegistry;
use kiln_common::model::formula::Formula;
use prettytable::{format, row, Table};

#[derive(Args, Debug)]
pub struct Info {
    /// Formula name or path to a formula file
    pub formula: String,
}

impl Info {
    pub async fn run(&self, config: &Config) -> Result<()> {
        tracing::debug!("Getting info for formula: {}", self.formula);
        let formula = Formulary::new(config.clone()).load_formula(&self.formula)?;
        let installed = KegRegistry::new(config.clone()).get_installed_keg(&formula.name)?;
        print_formula_info(&formula, installed.map(|keg| keg.path.display().to_string()));
        Ok(())
    }
}

fn new_table() -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
    table
}

fn print_formula_info(formula: &Formula, installed: Option<String>) {
    println!("{}", format!("Formula: {}", formula.name).green().bold());

    let mut table = new_table();
    table.add_row(row!["Version", formula.version]);
    table.add_row(row!["Homepage", formula.homepage.as_deref().unwrap_or("N/A")]);
    table.add_row(row!["Source", formula.url]);
    table.add_row(row!["Installed", installed.as_deref().unwrap_or("no")]);
    table.printstd();

    if let Some(desc) = formula.desc.as_deref().filter(|d| !d.is_empty()) {
        println!("\n{}", "Description".blue().bold());
        println!("  {desc}");
    }

    if !formula.dependencies.is_empty() {
        let mut dep_table = new_table();
        let mut add_deps = |title: &str, deps: Vec<&Dependency>| {
            for (i, dep) in deps.iter().enumerate() {
                let display_title = if i == 0 { title } else { "" };
                dep_table.add_row(row![display_title, dep.name]);
            }
        };
        add_deps("Required", formula.dependencies.runtime());
        add_deps("Optional", formula.dependencies.optional());
        add_deps("Build", formula.dependencies.build_time());
        println!("\n{}", "Dependencies".blue().bold());
        dep_table.printstd();
    }

    if !formula.options.is_empty() {
        let mut opt_table = new_table();
        for option in &formula.options {
            opt_table.add_row(row![format!("--{}", option.name), option.description]);
        }
        for alias in &formula.deprecated_options {
            opt_table.add_row(row![
                format!("--{}", alias.old).dimmed(),
                format!("deprecated, same as --{}", alias.new)
            ]);
        }
        println!("\n{}", "Options".blue().bold());
        opt_table.printstd();
    }

    if !formula.patches.is_empty() || !formula.resources.is_empty() {
        println!("\n{}", "Patches & resources".blue().bold());
        for patch in &formula.patches {
            println!("  patch     {}", patch.display_name());
        }
        for resource in &formula.resources {
            println!("  resource  {}", resource.name);
        }
    }

    for conflict in &formula.conflicts {
        println!(
            "\n{} {}",
            "Conflicts with:".yellow().bold(),
            conflict.names.join(", ")
        );
        println!("  {}", conflict.because);
    }

    println!("\n{}", "Installation".blue().bold());
    println!("  {} install {}", "kiln".cyan(), formula.name);
}
