use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use predicates::prelude::*;
use std::process::Command;

const BINARY: &str = "proteoscan";
const BATCH: &str = "tests/data/batch.fasta";
type TestResult = Result<(), Box<dyn std::error::Error>>;

#[test]
fn file_doesnt_exist() -> TestResult {
    let mut cmd = Command::cargo_bin(BINARY)?;

    cmd.arg("lengths").arg("file_which_does_not_exist.fasta");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Could not read FASTA file"));

    Ok(())
}

#[test]
fn reports_lengths() -> TestResult {
    Command::cargo_bin(BINARY)?
        .arg("lengths")
        .arg(BATCH)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "3 sequences, shortest 27 aa, longest 120 aa, mean 63.7 aa",
        ));

    Ok(())
}

#[test]
fn filters_by_length() -> TestResult {
    let output = Command::cargo_bin(BINARY)?
        .args(["filter", BATCH, "--len", "28,120"])
        .output()?;
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout)?;
    let headers = stdout
        .lines()
        .filter(|l| l.starts_with('>'))
        .collect::<Vec<_>>();

    assert_eq!(
        headers,
        vec![
            ">XP_001.1 calmodulin-like protein [Gallus gallus]",
            ">XP_002.1 hypothetical protein [Gallus gallus]"
        ]
    );
    // the wrapped residue lines are joined
    assert!(stdout.contains("\nMKTAYIAKQRQISFVKSHFSRQLEERLGLIEVQAPILSRVGDGT\n"));

    Ok(())
}

#[test]
fn splits_into_files() -> TestResult {
    let temp = assert_fs::TempDir::new()?;
    let outdir = temp.child("sequences");

    Command::cargo_bin(BINARY)?
        .args(["split", BATCH, "--outdir"])
        .arg(outdir.path())
        .assert()
        .success();

    outdir
        .child("XP_003.1.fasta")
        .assert(">XP_003.1 uncharacterized protein\nMSTNPKPQRKTKRNTNRRPQDVKFPGG\n");
    outdir.child("XP_001.1.fasta").assert(predicate::path::exists());
    outdir.child("XP_002.1.fasta").assert(predicate::path::exists());

    Ok(())
}

#[test]
fn collects_motif_counts() -> TestResult {
    // XP_002.1 has no motifs and the report of XP_003.1 is missing
    Command::cargo_bin(BINARY)?
        .args(["collect", "motifs", "--fasta", BATCH, "--reports", "tests/data/motifs"])
        .assert()
        .success()
        .stdout(
            "identifier,EF_HAND_1,ZINC_FINGER_C2H2_1\n\
             XP_001.1,2,1\n\
             XP_002.1,0,0\n\
             XP_003.1,,\n",
        )
        .stderr(predicate::str::contains("XP_003.1"));

    Ok(())
}

#[test]
fn collects_stats_to_tsv_with_summary() -> TestResult {
    let temp = assert_fs::TempDir::new()?;
    let table = temp.child("stats.tsv");
    let summary = temp.child("stats.html");

    Command::cargo_bin(BINARY)?
        .args(["collect", "stats", "--fasta", BATCH, "--reports", "tests/data/stats", "-o"])
        .arg(table.path())
        .arg("--summary")
        .arg(summary.path())
        .assert()
        .success();

    let contents = std::fs::read_to_string(table.path())?;
    let lines = contents.lines().collect::<Vec<_>>();

    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with(
        "identifier\tMolecular Weight\tNumber of Residues\tAverage Residue Weight\tCharge\t"
    ));
    assert!(lines[1].starts_with("XP_001.1\t13627.05\t120\t113.559\t-24\t3.9765\t1490\t1490\t"));
    // no charge in the report of XP_002.1: missing, not zero
    assert!(lines[2].starts_with("XP_002.1\t4959.7\t44\t112.72\t\t10.2113\t"));
    assert!(lines[3].starts_with("XP_003.1\t3143.56\t27\t116.428\t9\t12.3711\t"));

    summary.assert(predicate::str::contains("<svg").and(predicate::str::contains("Charge")));

    Ok(())
}

#[test]
fn collect_writes_warnings() -> TestResult {
    let temp = assert_fs::TempDir::new()?;
    let warnings = temp.child("warnings.tsv");

    Command::cargo_bin(BINARY)?
        .args(["collect", "motifs", "--fasta", BATCH, "--reports", "tests/data/motifs"])
        .arg("--warnings")
        .arg(warnings.path())
        .assert()
        .success();

    warnings.assert(predicate::str::starts_with(
        "identifier\tkind\tmessage\nXP_003.1\tmissing-input\t",
    ));

    Ok(())
}

#[test]
fn collect_without_any_report_fails() -> TestResult {
    let temp = assert_fs::TempDir::new()?;

    Command::cargo_bin(BINARY)?
        .args(["collect", "stats", "--fasta", BATCH, "--reports"])
        .arg(temp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("could be read"));

    Ok(())
}

#[test]
fn rejects_bad_interval() -> TestResult {
    Command::cargo_bin(BINARY)?
        .args(["filter", BATCH, "--len", "100"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid interval format"));

    Ok(())
}

#[cfg(unix)]
mod run {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    const ARGS: &str = r#"
while [ $# -gt 0 ]; do
  case "$1" in
    -sequence) seq="$2"; shift 2;;
    -outfile) out="$2"; shift 2;;
    *) shift;;
  esac
done
name=$(basename "$seq" .fasta)
"#;

    fn write_script(dir: &assert_fs::TempDir, name: &str, body: &str) -> TestResult {
        let script = dir.child(name);
        script.write_str(&format!("#!/bin/sh\n{ARGS}{body}"))?;
        std::fs::set_permissions(script.path(), std::fs::Permissions::from_mode(0o755))?;
        Ok(())
    }

    /// Stand-ins for the EMBOSS programs. `patmatmotifs` fails for XP_003.1.
    fn fake_emboss() -> Result<assert_fs::TempDir, Box<dyn std::error::Error>> {
        let bin = assert_fs::TempDir::new()?;

        write_script(
            &bin,
            "patmatmotifs",
            r#"
if [ "$name" = "XP_003.1" ]; then echo "cannot read $seq" >&2; exit 1; fi
printf '# Sequence: %s     from: 1   to: 10\n# HitCount: 1\n\nMotif = TEST_MOTIF\n' "$name" > "$out"
"#,
        )?;
        write_script(
            &bin,
            "pepstats",
            r#"
printf 'PEPSTATS of %s from 1 to 10\n\nMolecular weight = 1000.5\t\tResidues = 10\nAverage Residue Weight  = 100.050 \t\tCharge   = -1.5\n' "$name" > "$out"
"#,
        )?;

        Ok(bin)
    }

    fn run_command(bin: &assert_fs::TempDir, out: &assert_fs::TempDir) -> Command {
        let mut cmd = Command::cargo_bin(BINARY).unwrap();
        cmd.args(["run", BATCH, "--skip-conservation", "--len", "0,100", "-t", "2"])
            .arg("--outdir")
            .arg(out.path())
            .arg("--bin-dir")
            .arg(bin.path());
        cmd
    }

    #[test]
    fn runs_the_pipeline() -> TestResult {
        let bin = fake_emboss()?;
        let out = assert_fs::TempDir::new()?;

        run_command(&bin, &out).assert().success();

        // XP_001.1 is longer than 100 residues
        out.child("batch_min0_max100.fasta")
            .assert(predicate::str::contains(">XP_002.1").and(predicate::str::contains("XP_001.1").not()));
        out.child("sequences/XP_002.1.fasta").assert(predicate::path::exists());
        out.child("patmatmotifs/XP_002.1.patmatmotifs")
            .assert(predicate::path::exists());

        out.child("batch_motif_counts.csv")
            .assert("identifier,TEST_MOTIF\nXP_002.1,1\nXP_003.1,\n");
        out.child("batch_stats.csv").assert(
            "identifier,Molecular Weight,Number of Residues,Average Residue Weight,Charge\n\
             XP_002.1,1000.5,10,100.05,-1.5\n\
             XP_003.1,1000.5,10,100.05,-1.5\n",
        );
        out.child("batch_warnings.tsv").assert(
            predicate::str::starts_with("identifier\tkind\tmessage\nXP_003.1\ttool-failed\t"),
        );
        out.child("batch_run.json").assert(
            predicate::str::contains("\"record_count\": 3")
                .and(predicate::str::contains("\"retained_count\": 2"))
                .and(predicate::str::contains("\"warning_count\": 1")),
        );
        out.child("batch_motifs.html").assert(predicate::str::contains("<svg"));
        out.child("batch_stats.html").assert(predicate::str::contains("<svg"));

        Ok(())
    }

    #[test]
    fn strict_mode_fails_after_writing_outputs() -> TestResult {
        let bin = fake_emboss()?;
        let out = assert_fs::TempDir::new()?;

        run_command(&bin, &out)
            .arg("--strict")
            .assert()
            .failure()
            .stderr(predicate::str::contains("1 warning(s) were raised"));

        out.child("batch_stats.csv").assert(predicate::path::exists());
        out.child("batch_warnings.tsv")
            .assert(predicate::str::contains("tool-failed"));

        Ok(())
    }

    #[test]
    fn counts_records_before_dropping_repeats() -> TestResult {
        let bin = fake_emboss()?;
        let out = assert_fs::TempDir::new()?;

        Command::cargo_bin(BINARY)?
            .args(["run", "tests/data/duplicates.fasta", "--skip-conservation"])
            .arg("--outdir")
            .arg(out.path())
            .arg("--bin-dir")
            .arg(bin.path())
            .assert()
            .success();

        out.child("duplicates_run.json").assert(
            predicate::str::contains("\"record_count\": 3")
                .and(predicate::str::contains("\"retained_count\": 2"))
                .and(predicate::str::contains("\"warning_count\": 2")),
        );
        out.child("duplicates_warnings.tsv").assert(predicate::str::starts_with(
            "identifier\tkind\tmessage\nXP_002.1\tskipped-record\t",
        ));

        Ok(())
    }

    #[test]
    fn no_sequence_in_range_is_fatal() -> TestResult {
        let bin = fake_emboss()?;
        let out = assert_fs::TempDir::new()?;

        Command::cargo_bin(BINARY)?
            .args(["run", BATCH, "--skip-conservation", "--len", "500,inf"])
            .arg("--outdir")
            .arg(out.path())
            .arg("--bin-dir")
            .arg(bin.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("no sequences have a length within"));

        Ok(())
    }
}
