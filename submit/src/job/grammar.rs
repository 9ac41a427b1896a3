//! Line grammar of job configuration files.
//!
//! Directives live in comments so they can be embedded into any configuration file format
//! that uses `#` comments:
//!
//! ```text
//! # SUBMIT: runner = train.sh
//! # SUBMIT: input-files = data.npz, labels.npz
//! # SUBMIT: gpu = prefer
//! # SBATCH --mem=8G
//! # SBATCH GPU --partition=gpu
//! # SBATCH CPU --cpus-per-task=16
//! ```

const DECLARATION: &str = "SUBMIT:";
const SCHEDULER_OPTION: &str = "SBATCH";

/// which submissions a scheduler option applies to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionScope {
    All,
    Gpu,
    Cpu,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Line<'a> {
    Declaration { key: &'a str, value: &'a str },
    // `# SUBMIT:` without `=`
    MalformedDeclaration,
    SchedulerOption { scope: OptionScope, text: &'a str },
    Unrecognized,
}

/// classify a single line, keywords are matched case-insensitively
pub fn classify(line: &str) -> Line<'_> {
    let Some(comment) = line.trim().strip_prefix('#') else {
        return Line::Unrecognized;
    };
    let comment = comment.trim_start();

    if let Some(declaration) = strip_keyword(comment, DECLARATION) {
        return match declaration.split_once('=') {
            Some((key, value)) => Line::Declaration {
                key: key.trim(),
                value: value.trim(),
            },
            None => Line::MalformedDeclaration,
        };
    }

    match strip_keyword(comment, SCHEDULER_OPTION) {
        // `#SBATCHED` and friends are ordinary comments
        Some(option) if option.is_empty() || option.starts_with(char::is_whitespace) => {
            let (scope, text) = split_scope(option.trim());

            Line::SchedulerOption { scope, text }
        }
        _ => Line::Unrecognized,
    }
}

fn split_scope(option: &str) -> (OptionScope, &str) {
    let (head, rest) = option
        .split_once(char::is_whitespace)
        .unwrap_or((option, ""));

    if head.eq_ignore_ascii_case("gpu") {
        (OptionScope::Gpu, rest.trim())
    } else if head.eq_ignore_ascii_case("cpu") {
        (OptionScope::Cpu, rest.trim())
    } else {
        (OptionScope::All, option)
    }
}

fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let head = text.get(..keyword.len())?;

    head.eq_ignore_ascii_case(keyword)
        .then(|| &text[keyword.len()..])
}
