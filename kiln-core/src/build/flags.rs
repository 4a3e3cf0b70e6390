// kiln-core/src/build/flags.rs
use kiln_common::dependency::DependencySet;
use kiln_common::model::formula::Formula;
use kiln_common::model::options::ResolvedConfig;

use super::template::TemplateContext;

/// An option is active when it is on and, if it switches an optional
/// dependency on, that dependency was found.
pub fn is_active(
    formula: &Formula,
    config: &ResolvedConfig,
    deps: &DependencySet,
    option: &str,
) -> bool {
    if !config.is_on(option) {
        return false;
    }
    match formula.dependency_for_option(option) {
        Some(dep) => deps.is_present(&dep.name),
        None => true,
    }
}

/// Configure arguments: the expanded base args followed by each conditional
/// flag's `enable` or `disable` list, in declaration order.
pub fn assemble_flags(
    formula: &Formula,
    config: &ResolvedConfig,
    deps: &DependencySet,
    ctx: &TemplateContext<'_>,
) -> Vec<String> {
    let mut args = ctx.expand_all(&formula.install.args);
    for flag in &formula.install.flags {
        let chosen = if is_active(formula, config, deps, &flag.when) {
            &flag.enable
        } else {
            &flag.disable
        };
        args.extend(chosen.iter().map(|arg| ctx.expand(arg)));
    }
    args
}
