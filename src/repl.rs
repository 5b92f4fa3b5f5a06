use std::fmt::Write;

use bugreport_anr::inspector::{combine_locks, inspect, render_triage};
use bugreport_anr::Bugreport;
use rustyline::{error::ReadlineError, DefaultEditor};

const HELP: &str = "\
anr             the ANR the monkey stopped on
cpu             cpu usage tables of the ANR
processes       processes with a thread dump
threads <pid>   threads of one process with their locks
inspect         blocked threads, deadlock and interesting processes
report          main thread, deadlock and interesting stacks, each thread once
exit            leave";

struct ReplState {
    bugreport: Bugreport,
    last_command: String,
}

pub fn repl(bugreport: Bugreport) {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(err) => {
            eprintln!("Error: {:?}", err);
            return;
        }
    };
    let mut state = ReplState {
        bugreport,
        last_command: String::new(),
    };

    println!("{}", state.bugreport);
    loop {
        match rl.readline(">> ") {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                let mut input = line.trim().to_string();
                // an empty line repeats the last command
                if input.is_empty() {
                    input = state.last_command.clone();
                }
                if input == "exit" {
                    println!("Goodbye!");
                    break;
                }
                println!("{}", evaluate_input(&input, &state));
                state.last_command = input;
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }
}

fn evaluate_input(input: &str, state: &ReplState) -> String {
    let parts: Vec<&str> = input.split_whitespace().collect();
    let Some(&command) = parts.first() else {
        return String::new();
    };
    if command == "help" {
        return HELP.to_string();
    }
    let Some(anr) = &state.bugreport.anr else {
        return "no ANR found".to_string();
    };

    match command {
        "anr" => anr.to_string(),
        "cpu" => {
            if anr.cpu_usages.is_empty() {
                return "no cpu usage table".to_string();
            }
            let tables: Vec<String> = anr.cpu_usages.iter().map(|c| c.to_string()).collect();
            tables.join("\n")
        }
        "processes" => {
            let mut out = String::new();
            for process in &anr.vm_traces.processes {
                let _ = writeln!(
                    out,
                    "{:>6} {:<40} {} threads",
                    process.pid,
                    process.cmd_line.as_deref().unwrap_or("?"),
                    process.threads.len()
                );
            }
            if out.is_empty() {
                "no thread dump".to_string()
            } else {
                out.trim_end().to_string()
            }
        }
        "threads" => {
            let Some(pid) = parts.get(1).and_then(|p| p.parse::<u32>().ok()) else {
                return "Invalid threads command. Usage: threads <pid>".to_string();
            };
            let Some(process) = anr.vm_traces.find_process(pid) else {
                return format!("no thread dump for pid {pid}");
            };
            let mut out = String::new();
            for thread in &process.threads {
                let _ = writeln!(out, "{thread}");
                for lock in combine_locks(thread).values() {
                    let kinds: Vec<String> = lock.kinds.iter().map(|k| format!("{k:?}")).collect();
                    let _ = writeln!(
                        out,
                        "    <0x{}> {} [{}]",
                        lock.address,
                        lock.class_name,
                        kinds.join(", ")
                    );
                }
            }
            out.trim_end().to_string()
        }
        "inspect" => inspect(anr).to_string(),
        "report" => render_triage(anr, &inspect(anr)).trim_end().to_string(),
        _ => format!("Unknown command '{command}', try help"),
    }
}
