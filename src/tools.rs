//! The boundary to the external programs the pipeline drives: Entrez Direct for retrieval,
//! Clustal Omega for alignment, and EMBOSS for conservation plots, motif scans and peptide
//! statistics.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use pariter::IteratorExt as _;
use thiserror::Error;

/// What an external program produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocationResult {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolInvocationResult {
    fn from_output(output: Output) -> Self {
        ToolInvocationResult {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Converts an unsuccessful invocation of `program` into an error.
    pub fn check(self, program: &str) -> Result<Self, ToolError> {
        if self.success() {
            return Ok(self);
        }

        Err(ToolError::Failed {
            program: program.to_string(),
            status: match self.exit_code {
                Some(code) => format!("exit status {code}"),
                None => "a signal".to_string(),
            },
            stderr: self.stderr.trim().to_string(),
        })
    }
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("could not start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` terminated with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

/// A single invocation of an external program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        ToolCommand {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }

    /// The name of the program, without any directory.
    pub fn name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.to_string_lossy().into_owned())
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }

    fn spawn_error(&self, source: std::io::Error) -> ToolError {
        ToolError::Spawn {
            program: self.program.to_string_lossy().into_owned(),
            source,
        }
    }

    /// Runs the program to completion, capturing its output. Only a failure to start the program
    /// is an error; a non-zero exit is reported through the result.
    pub fn invoke(&self) -> Result<ToolInvocationResult, ToolError> {
        debug!("Running {self}");
        let output = self
            .command()
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.spawn_error(e))?;

        Ok(ToolInvocationResult::from_output(output))
    }

    /// Like [`ToolCommand::invoke`], with `input` written to the standard input of the program.
    pub fn invoke_with_input(&self, input: &[u8]) -> Result<ToolInvocationResult, ToolError> {
        debug!("Running {self} with {} bytes of input", input.len());
        let mut child = self
            .command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        // feed stdin from another thread so a program writing a lot of output cannot block us
        let stdin = child.stdin.take();
        let output = std::thread::scope(|scope| {
            if let Some(mut stdin) = stdin {
                scope.spawn(move || {
                    // a program may exit without reading its input, which is not an error here
                    let _ = stdin.write_all(input);
                });
            }
            child.wait_with_output()
        })
        .map_err(|e| self.spawn_error(e))?;

        Ok(ToolInvocationResult::from_output(output))
    }
}

impl std::fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "`{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        write!(f, "`")
    }
}

/// Runs `commands` one after another, each receiving the output of the previous one on its
/// standard input, like a shell pipeline. Stops at the first unsuccessful program.
pub fn run_chain(commands: &[ToolCommand]) -> Result<ToolInvocationResult, ToolError> {
    let mut previous: Option<ToolInvocationResult> = None;

    for command in commands {
        let result = match &previous {
            None => command.invoke()?,
            Some(prev) => command.invoke_with_input(prev.stdout.as_bytes())?,
        };
        previous = Some(result.check(&command.name())?);
    }

    Ok(previous.unwrap_or(ToolInvocationResult {
        exit_code: Some(0),
        stdout: String::new(),
        stderr: String::new(),
    }))
}

/// Runs every command on a bounded pool of `threads` workers. Results are returned in the order
/// of `commands`.
pub fn invoke_all(
    commands: Vec<ToolCommand>,
    threads: usize,
) -> Vec<Result<ToolInvocationResult, ToolError>> {
    let threads = threads.max(1);
    let cache_size = threads * 3;

    let result = crossbeam::thread::scope(|scope| {
        commands
            .into_iter()
            .parallel_map_scoped_custom(
                scope,
                |o| o.threads(threads).buffer_size(cache_size),
                |command: ToolCommand| command.invoke(),
            )
            .collect::<Vec<_>>()
    });

    // Threads can't send regular errors well between them, so
    // if there is an issue here we panic
    result.unwrap_or_else(|e| {
        error!("Caught a panic which is unrecoverable");
        std::panic::resume_unwind(e)
    })
}

/// Where the external programs are found.
#[derive(Debug, Clone, Default)]
pub struct ToolConfig {
    /// Directory holding the executables; the `PATH` is searched when unset
    pub bin_dir: Option<PathBuf>,
}

impl ToolConfig {
    pub fn new(bin_dir: Option<PathBuf>) -> Self {
        ToolConfig { bin_dir }
    }

    fn program(&self, name: &str) -> ToolCommand {
        match &self.bin_dir {
            Some(dir) => ToolCommand::new(dir.join(name)),
            None => ToolCommand::new(name),
        }
    }

    /// Scans `sequence` against the PROSITE motifs. With `prune`, simple post-translational
    /// modification sites are not reported.
    pub fn patmatmotifs(&self, sequence: &Path, outfile: &Path, prune: bool) -> ToolCommand {
        let command = self
            .program("patmatmotifs")
            .arg("-sequence")
            .path_arg(sequence)
            .arg("-outfile")
            .path_arg(outfile);

        if prune {
            command.arg("-prune")
        } else {
            command
        }
    }

    pub fn pepstats(&self, sequence: &Path, outfile: &Path) -> ToolCommand {
        self.program("pepstats")
            .arg("-sequence")
            .path_arg(sequence)
            .arg("-outfile")
            .path_arg(outfile)
    }

    pub fn clustalo(&self, infile: &Path, outfile: &Path, threads: usize) -> ToolCommand {
        self.program("clustalo")
            .arg(format!("--infile={}", infile.display()))
            .arg(format!("--outfile={}", outfile.display()))
            .arg(format!("--threads={}", threads.max(1)))
            .arg("--force")
    }

    /// Plots the similarity of an alignment as `<directory>/<name>.1.png`.
    pub fn plotcon(&self, alignment: &Path, directory: &Path, name: &str) -> ToolCommand {
        self.program("plotcon")
            .arg("-sequences")
            .path_arg(alignment)
            .arg("-sprotein1")
            .arg("True")
            .arg("-winsize")
            .arg("4")
            .arg("-graph")
            .arg("png")
            .arg("-gdirectory")
            .path_arg(directory)
            .arg("-goutfile")
            .arg(name)
    }

    pub fn esearch(&self, db: &str, query: &str) -> ToolCommand {
        self.program("esearch")
            .arg("-db")
            .arg(db)
            .arg("-spell")
            .arg("-query")
            .arg(query)
    }

    pub fn efetch(&self, format: Option<&str>) -> ToolCommand {
        let command = self.program("efetch");
        match format {
            Some(format) => command.arg("-format").arg(format),
            None => command,
        }
    }

    pub fn xtract(&self, pattern: &str, element: &str) -> ToolCommand {
        self.program("xtract")
            .arg("-pattern")
            .arg(pattern)
            .arg("-element")
            .arg(element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_emboss_commands() {
        let tools = ToolConfig::new(Some(PathBuf::from("/opt/emboss/bin")));
        let cmd = tools.patmatmotifs(Path::new("s/A.fasta"), Path::new("m/A.patmatmotifs"), true);

        assert_eq!(cmd.program, PathBuf::from("/opt/emboss/bin/patmatmotifs"));
        assert_eq!(
            cmd.args,
            vec!["-sequence", "s/A.fasta", "-outfile", "m/A.patmatmotifs", "-prune"]
        );
        assert_eq!(cmd.name(), "patmatmotifs");

        let cmd = ToolConfig::default().clustalo(Path::new("t.fasta"), Path::new("t.msf"), 0);
        assert_eq!(cmd.program, PathBuf::from("clustalo"));
        assert_eq!(
            cmd.args,
            vec!["--infile=t.fasta", "--outfile=t.msf", "--threads=1", "--force"]
        );
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let result = ToolCommand::new("proteoscan-no-such-program").invoke();
        assert!(matches!(result, Err(ToolError::Spawn { .. })));
    }

    #[test]
    fn failed_result_converts_to_error() {
        let result = ToolInvocationResult {
            exit_code: Some(2),
            stdout: String::new(),
            stderr: "bad sequence\n".to_string(),
        };
        assert!(!result.success());

        let err = result.check("pepstats").unwrap_err();
        assert_eq!(
            err.to_string(),
            "`pepstats` terminated with exit status 2: bad sequence"
        );
    }

    #[cfg(unix)]
    #[test]
    fn captures_output_and_exit_code() {
        let ok = ToolCommand::new("sh").arg("-c").arg("echo hello").invoke().unwrap();
        assert!(ok.success());
        assert_eq!(ok.stdout, "hello\n");

        let failed = ToolCommand::new("sh")
            .arg("-c")
            .arg("echo oops >&2; exit 3")
            .invoke()
            .unwrap();
        assert_eq!(failed.exit_code, Some(3));
        assert_eq!(failed.stderr, "oops\n");
    }

    #[cfg(unix)]
    #[test]
    fn chains_like_a_pipeline() {
        let result = run_chain(&[
            ToolCommand::new("sh").arg("-c").arg("printf 'b\\na\\n'"),
            ToolCommand::new("sort"),
        ])
        .unwrap();
        assert_eq!(result.stdout, "a\nb\n");

        let result = run_chain(&[
            ToolCommand::new("sh").arg("-c").arg("exit 1"),
            ToolCommand::new("sort"),
        ]);
        assert!(matches!(result, Err(ToolError::Failed { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn pool_keeps_input_order() {
        let commands = (0..12)
            .map(|i| ToolCommand::new("sh").arg("-c").arg(format!("echo {i}")))
            .collect::<Vec<_>>();

        let outputs = invoke_all(commands, 4)
            .into_iter()
            .map(|r| r.unwrap().stdout.trim().to_string())
            .collect::<Vec<_>>();

        let expected = (0..12).map(|i| i.to_string()).collect::<Vec<_>>();
        assert_eq!(outputs, expected);
    }
}
