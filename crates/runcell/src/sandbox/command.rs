//! Command construction from language templates
//!
//! Templates are argument vectors. Each argument may contain the
//! placeholders `{source}`, `{output}` and `{workspace}`; `{{` and `}}`
//! produce literal braces. The result is a program plus argv that is handed
//! to the OS directly, never to a shell.

use std::fmt;
use std::path::Path;

use thiserror::Error;

use crate::config::{EnvVar, Language};
use crate::sandbox::Workspace;

/// Errors in a command template
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("command template is empty")]
    EmptyCommand,

    #[error("unknown placeholder '{{{0}}}'")]
    UnknownPlaceholder(String),

    #[error("unterminated placeholder in '{0}'")]
    UnterminatedPlaceholder(String),

    #[error("unmatched '}}' in '{0}'")]
    UnmatchedBrace(String),

    #[error("'{{output}}' used by a language without a compile step")]
    OutputWithoutCompile,
}

/// A value substituted into command templates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// Absolute path of the source file
    Source,
    /// Absolute path of the compiled artifact
    Output,
    /// Absolute path of the workspace root
    Workspace,
}

impl Placeholder {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "source" => Some(Placeholder::Source),
            "output" => Some(Placeholder::Output),
            "workspace" => Some(Placeholder::Workspace),
            _ => None,
        }
    }
}

/// A fully expanded command, ready to spawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl fmt::Display for BuiltCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg:?}")?;
        }
        Ok(())
    }
}

/// Concrete values for each placeholder
struct Substitutions {
    source: String,
    output: Option<String>,
    workspace: String,
}

impl Substitutions {
    fn for_workspace(root: &Path, language: &Language) -> Self {
        Self {
            source: path_string(&root.join(&language.source_name)),
            output: language
                .output_name()
                .map(|name| path_string(&root.join(name))),
            workspace: path_string(root),
        }
    }

    fn get(&self, placeholder: Placeholder) -> Result<&str, CommandError> {
        match placeholder {
            Placeholder::Source => Ok(&self.source),
            Placeholder::Output => self
                .output
                .as_deref()
                .ok_or(CommandError::OutputWithoutCompile),
            Placeholder::Workspace => Ok(&self.workspace),
        }
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Expand every placeholder in a single template argument
fn expand(arg: &str, subs: &Substitutions) -> Result<String, CommandError> {
    let mut out = String::with_capacity(arg.len());
    let mut rest = arg;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after) = tail.strip_prefix("{{") {
            out.push('{');
            rest = after;
            continue;
        }
        if let Some(after) = tail.strip_prefix("}}") {
            out.push('}');
            rest = after;
            continue;
        }
        if tail.starts_with('}') {
            return Err(CommandError::UnmatchedBrace(arg.to_owned()));
        }

        let end = tail
            .find('}')
            .ok_or_else(|| CommandError::UnterminatedPlaceholder(arg.to_owned()))?;
        let name = &tail[1..end];
        let placeholder = Placeholder::from_name(name)
            .ok_or_else(|| CommandError::UnknownPlaceholder(name.to_owned()))?;
        out.push_str(subs.get(placeholder)?);
        rest = &tail[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

fn expand_all(
    template: &[String],
    env: &[EnvVar],
    subs: &Substitutions,
) -> Result<BuiltCommand, CommandError> {
    let (program, args) = template.split_first().ok_or(CommandError::EmptyCommand)?;

    let program = expand(program, subs)?;
    if program.is_empty() {
        return Err(CommandError::EmptyCommand);
    }

    let args = args
        .iter()
        .map(|arg| expand(arg, subs))
        .collect::<Result<Vec<_>, _>>()?;
    let env = env
        .iter()
        .map(|var| Ok((var.name.clone(), expand(&var.value, subs)?)))
        .collect::<Result<Vec<_>, CommandError>>()?;

    Ok(BuiltCommand { program, args, env })
}

/// Build a command for `language` from `template` inside `workspace`
pub fn build(
    template: &[String],
    env: &[EnvVar],
    workspace: &Workspace,
    language: &Language,
) -> Result<BuiltCommand, CommandError> {
    let subs = Substitutions::for_workspace(workspace.root(), language);
    expand_all(template, env, &subs)
}

/// Check a template without a workspace
///
/// `has_output` says whether `{output}` is available, i.e. whether the
/// language has a compile step.
pub fn validate_template(
    template: &[String],
    env: &[EnvVar],
    has_output: bool,
) -> Result<(), CommandError> {
    let subs = Substitutions {
        source: "source".to_owned(),
        output: has_output.then(|| "output".to_owned()),
        workspace: "workspace".to_owned(),
    };
    expand_all(template, env, &subs).map(|_| ())
}
