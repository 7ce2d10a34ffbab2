//! CLI definition.
//!
//! manifold has a single operation, so the run arguments are flattened
//! into the top-level parser.

use clap::Parser;

pub mod run;

/// manifold - manifest-driven file generation
#[derive(Parser, Debug)]
#[command(name = "manifold")]
#[command(version, about = "manifold - manifest-driven file generation")]
#[command(long_about = r#"
manifold renders every item of a manifest through a template. Each rendered
document is a directive that writes, copies, concatenates or runs something,
or expands a nested template over a nested manifest.

INPUTS:
  A template unit directory holds template.yaml and, optionally,
  manifest.yaml and schema.json / schema.yaml. An input may also be a
  directory of units, a bare template file, or a comma list
  template,manifest[,schema].

EXIT CODES:
  0 - Success
  1 - One or more manifest items failed validation
  2 - Fatal error
"#)]
pub struct Cli {
    /// Enable verbose output
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(flatten)]
    pub run: run::RunArgs,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_repeated_flags() {
        let cli = Cli::try_parse_from([
            "manifold",
            "-i",
            "units/api",
            "--input",
            "units/web",
            "-v",
            "env=prod",
            "--valueFile",
            "env=prod.yaml",
            "--match",
            "name=api",
            "--match",
            "name=web",
            "--relativeToManifest",
            "--base",
        ])
        .unwrap();

        assert_eq!(cli.run.input, vec!["units/api", "units/web"]);
        assert_eq!(cli.run.values, vec!["env=prod"]);
        assert_eq!(cli.run.value_files, vec!["env=prod.yaml"]);
        assert_eq!(cli.run.matches.len(), 2);
        assert!(cli.run.relative);
        assert!(cli.run.base);
        assert!(!cli.run.dry);
    }

    #[test]
    fn test_options_from_flags() {
        let cli = Cli::try_parse_from([
            "manifold",
            "-i",
            "units",
            "--dry",
            "--enable-exec",
            "--share-values",
            "--archive",
            "out.zip",
            "--max-depth",
            "4",
        ])
        .unwrap();

        let options = cli.run.options();
        assert!(options.dry_run);
        assert!(options.enable_exec);
        assert_eq!(options.values_mode, manifold_templates::ValuesMode::Shared);
        assert_eq!(options.archive.as_deref(), Some(std::path::Path::new("out.zip")));
        assert_eq!(options.max_depth, 4);
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["manifold", "--verbose", "--quiet"]).is_err());
    }
}
