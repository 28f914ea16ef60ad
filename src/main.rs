use loyal::{Error, highlight, logging, run_source_with, tokenize};
use std::io::Read;
use std::process::ExitCode;

const USAGE: &str = "Usage: loyal [--highlight | --tokens] [FILE]\n\
                     Runs FILE (or standard input when no file is given).";

enum Command {
    Run,
    Highlight,
    Tokens,
}

// Returns (display name, contents); no path means standard input.
fn read_source(path: Option<&str>) -> std::io::Result<(String, String)> {
    match path {
        Some(path) => Ok((path.to_string(), std::fs::read_to_string(path)?)),
        None => {
            let mut source = String::new();
            std::io::stdin().read_to_string(&mut source)?;
            Ok(("<stdin>".to_string(), source))
        }
    }
}

fn report(err: Error, name: &str, source: &str) -> ExitCode {
    if err.pretty_print(name, source).is_err() {
        eprintln!("{}", err);
    }
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    logging::init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, path) = match args.as_slice() {
        [] => (Command::Run, None),
        [flag] if flag == "--help" || flag == "-h" => {
            println!("{}", USAGE);
            return ExitCode::SUCCESS;
        }
        [flag, path] if flag == "--highlight" => (Command::Highlight, Some(path.as_str())),
        [flag, path] if flag == "--tokens" => (Command::Tokens, Some(path.as_str())),
        [path] if !path.starts_with("--") => (Command::Run, Some(path.as_str())),
        _ => {
            eprintln!("{}", USAGE);
            return ExitCode::from(2);
        }
    };

    let (name, source) = match read_source(path) {
        Ok(read) => read,
        Err(e) => {
            eprintln!("Error reading {}: {}", path.unwrap_or("<stdin>"), e);
            return ExitCode::FAILURE;
        }
    };

    match command {
        Command::Run => match run_source_with(&source, |line| println!("{}", line)) {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => report(e, &name, &source),
        },
        Command::Highlight => {
            print!("{}", highlight::highlight_html(&source));
            ExitCode::SUCCESS
        }
        Command::Tokens => match tokenize(&source) {
            Ok(tokens) => {
                for token in tokens.iter().filter(|t| !t.kind.is_whitespace()) {
                    println!(
                        "{}:{}\t{:?}\t{:?}",
                        token.line, token.column, token.kind, token.lexeme
                    );
                }
                ExitCode::SUCCESS
            }
            Err(e) => report(e.into(), &name, &source),
        },
    }
}
