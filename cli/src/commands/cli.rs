use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "gitkeeper", version, about = "Git task runtime for large binary-heavy projects")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Any path inside the repository; defaults to the current directory.
    #[arg(long, short = 'C', global = true)]
    pub repo: Option<PathBuf>,

    /// Print results as JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Hide the progress bar.
    #[arg(long, global = true)]
    pub no_progress: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct CommitArgs {
    #[arg(long, short = 'm')]
    pub message: String,

    #[arg(long)]
    pub body: Option<String>,

    /// Files to commit; everything when empty.
    pub files: Vec<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RemoteBranchArgs {
    /// Remote name; the current branch's tracked remote when unset.
    #[arg(long)]
    pub remote: Option<String>,

    /// Branch name; the current branch when unset.
    #[arg(long)]
    pub branch: Option<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct DiscardArgs {
    /// Discard every change in the work tree.
    #[arg(long, conflicts_with = "paths")]
    pub all: bool,

    /// Repository-relative paths as listed by `status`.
    pub paths: Vec<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct WatchArgs {
    /// Stop after this many seconds; runs until Ctrl-C when unset.
    #[arg(long)]
    pub seconds: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Working tree status.
    Status,
    /// Commit history.
    Log {
        #[arg(long, short = 'n')]
        limit: Option<usize>,
    },
    /// History of one file.
    FileLog { path: String },
    /// Local and remote branches.
    Branches,
    /// LFS locks on the current remote.
    Locks,
    Commit(CommitArgs),
    Push(RemoteBranchArgs),
    Pull(RemoteBranchArgs),
    Fetch {
        #[arg(long)]
        remote: Option<String>,
    },
    /// Check out an existing branch.
    Switch { branch: String },
    /// Create a branch from `base`.
    Branch {
        name: String,
        #[arg(long, default_value = "HEAD")]
        base: String,
    },
    Discard(DiscardArgs),
    Lock { path: String },
    Unlock {
        path: String,
        #[arg(long)]
        force: bool,
    },
    /// Watch the repository and print every update.
    Watch(WatchArgs),
    /// Locate and validate git and git-lfs.
    Installation {
        /// Ignore the stored result and probe again.
        #[arg(long)]
        refresh: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_follow_subcommands() {
        let args = Args::try_parse_from(["gitkeeper", "push", "--remote", "upstream", "--json", "-C", "/tmp/r"]).unwrap();
        assert!(args.json);
        assert_eq!(args.repo, Some(PathBuf::from("/tmp/r")));
        match args.command {
            Commands::Push(p) => {
                assert_eq!(p.remote.as_deref(), Some("upstream"));
                assert_eq!(p.branch, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn discard_all_excludes_paths() {
        assert!(Args::try_parse_from(["gitkeeper", "discard", "--all", "a.txt"]).is_err());
        let ok = Args::try_parse_from(["gitkeeper", "discard", "a.txt", "b.txt"]).unwrap();
        assert!(matches!(ok.command, Commands::Discard(d) if d.paths.len() == 2 && !d.all));
    }
}
