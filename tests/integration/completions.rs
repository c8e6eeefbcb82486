use clap::CommandFactory;
use clap_complete::aot::generate;
use std::io::BufWriter;

fn completions_for(shell: clap_complete::aot::Shell) -> String {
    let mut buf = BufWriter::new(Vec::new());
    generate(shell, &mut proxyme::cli::Cli::command(), "proxyme", &mut buf);
    String::from_utf8(buf.into_inner().unwrap()).unwrap()
}

#[test]
fn completions_bash_generates_output() {
    let output = completions_for(clap_complete::aot::Shell::Bash);
    assert!(!output.is_empty(), "bash completions should not be empty");
    assert!(output.contains("proxyme"));
    assert!(output.contains("restart"));
}

#[test]
fn completions_zsh_generates_output() {
    let output = completions_for(clap_complete::aot::Shell::Zsh);
    assert!(output.contains("proxyme"));
}

#[test]
fn completions_subcommand_prints_script() {
    assert_cmd::Command::cargo_bin("proxyme")
        .unwrap()
        .args(["completions", "fish"])
        .assert()
        .success()
        .stdout(predicates::str::contains("proxyme"));
}
