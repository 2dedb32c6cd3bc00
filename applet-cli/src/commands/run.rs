//! Interactive script runner.
//!
//! Boots the script on a host task and reads commands from stdin. Commands
//! wait until the host has settled, so piped input behaves the same as
//! typed input. While a permission prompt is open, the next line answers it.

use super::{call_bridge, parse_path};
use crate::outline::outline;
use anyhow::{Context, Result};
use applet_runtime::{
    AppHost, ChannelPrompt, CommandRuntime, Config, EventSink, FixedPrompt, Frame, HostStatus,
    InteractionError, PendingPrompt, PermissionGate, PermissionPrompt, PermissionRequest, Rendered,
    UiInterpreter,
};
use applet_types::{Decision, InboundMessage};
use serde_json::Value;
use std::collections::VecDeque;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

const HELP: &str = "commands: press P | edit P TEXT | submit P | toggle P | select P INDEX | \
                    search P TEXT | copy P | grants | revoke | state | help | quit";

pub(crate) fn print_request(request: &PermissionRequest) {
    println!("permission requested for {} call(s):", request.calls.len());
    for call in &request.calls {
        println!("  {}", call);
    }
    println!("allow? [d]eny / allow [o]nce / allow [a]lways");
}

enum Outcome {
    Continue,
    Quit,
}

struct Repl {
    interpreter: UiInterpreter,
    local_events: mpsc::UnboundedReceiver<InboundMessage>,
    host_events: EventSink,
    rendered: Option<Rendered>,
    /// Render pass the host must reach before the next command runs
    min_pass: u64,
    printed_pass: u64,
    reported_failure: bool,
}

impl Repl {
    fn settled(&self, frame: &Frame) -> bool {
        match frame.status {
            HostStatus::Failed(_) => true,
            HostStatus::Ready => frame.pass >= self.min_pass,
            _ => false,
        }
    }

    fn show(&mut self, frame: &Frame) {
        if let HostStatus::Failed(reason) = &frame.status {
            if !self.reported_failure {
                println!("host failed: {}", reason);
                self.reported_failure = true;
            }
            return;
        }
        if frame.pass == self.printed_pass {
            return;
        }

        self.printed_pass = frame.pass;
        self.rendered = frame.ui.as_ref().map(|ui| self.interpreter.render(ui));
        if let Some(rendered) = &self.rendered {
            println!("-- frame {} --", frame.pass);
            print!("{}", outline(rendered.root()));
        }
    }

    fn execute(&mut self, line: &str, frame: &Frame, grants: &PermissionGate) -> Outcome {
        let mut words = line.trim().splitn(3, ' ');
        let command = words.next().unwrap_or_default();
        let target = words.next();
        let rest = words.next();

        let result = match command {
            "" => Ok(()),
            "quit" | "exit" => return Outcome::Quit,
            "help" => {
                println!("{}", HELP);
                Ok(())
            }
            "state" => {
                println!("{}", frame.state.clone().unwrap_or(Value::Null));
                Ok(())
            }
            "grants" => {
                let granted = grants.granted();
                if granted.is_empty() {
                    println!("no permanent grants");
                }
                for key in granted {
                    println!("{}", key);
                }
                Ok(())
            }
            "revoke" => {
                grants.revoke_all();
                println!("grants revoked");
                Ok(())
            }
            _ => self.interact(command, target, rest),
        };

        if let Err(err) = result {
            println!("error: {}", err);
        }
        self.forward_events(frame.pass);
        Outcome::Continue
    }

    fn interact(&mut self, command: &str, target: Option<&str>, rest: Option<&str>) -> Result<(), String> {
        let Some(rendered) = self.rendered.as_mut() else {
            return Err("nothing rendered yet".to_string());
        };
        let path = target
            .and_then(parse_path)
            .ok_or_else(|| "expected a widget path, see `help`".to_string())?;
        let text = rest.unwrap_or_default();

        let result: Result<(), InteractionError> = match command {
            "press" => rendered.press(&path),
            "edit" => rendered.edit(&path, text),
            "submit" => rendered.submit(&path),
            "toggle" => rendered.toggle(&path),
            "select" => {
                let index = text
                    .trim()
                    .parse()
                    .map_err(|_| "expected an option index".to_string())?;
                rendered.choose(&path, index)
            }
            "search" => rendered.search(&path, text).map(|()| {
                print!("{}", outline(rendered.root()));
            }),
            "copy" => rendered.copy_text(&path).map(|copied| println!("copied: {}", copied)),
            other => return Err(format!("unknown command `{}`, see `help`", other)),
        };
        result.map_err(|e| e.to_string())
    }

    /// Hand locally emitted events to the host, one render pass each.
    fn forward_events(&mut self, current_pass: u64) {
        let mut sent = 0;
        while let Ok(msg) = self.local_events.try_recv() {
            self.host_events.emit(msg);
            sent += 1;
        }
        if sent > 0 {
            self.min_pass = current_pass + sent;
        }
    }
}

/// Stdin is read on a plain thread so a pending read never holds up exit.
fn spawn_stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn next_prompt(
    prompts: &mut Option<mpsc::UnboundedReceiver<PendingPrompt>>,
) -> Option<PendingPrompt> {
    match prompts {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

pub async fn run_script(
    config_path: &Path,
    script_path: &Path,
    arg: Option<&str>,
    auto: Option<Decision>,
) -> Result<()> {
    let config = Config::load_or_default(config_path).context("Failed to load configuration")?;
    let script = std::fs::read_to_string(script_path)
        .with_context(|| format!("Failed to read script {:?}", script_path))?;
    let initial_arg = arg
        .map(serde_json::from_str::<Value>)
        .transpose()
        .context("--arg must be valid JSON")?;

    let runtime = CommandRuntime::from_config(&config).context("No script runtime configured")?;
    let host_config = config.host_config();
    let mut prompts = None;
    let prompt: Arc<dyn PermissionPrompt> = match auto {
        Some(decision) => Arc::new(FixedPrompt(decision)),
        None => {
            let (prompt, rx) = ChannelPrompt::new(host_config.prompt_timeout);
            prompts = Some(rx);
            Arc::new(prompt)
        }
    };

    let host = AppHost::new(Arc::new(runtime), call_bridge(&config), prompt, &host_config);
    let handle = host.spawn(script, initial_arg);
    let mut frames = handle.frames.clone();

    let (local_sink, local_events) = EventSink::channel();
    let mut repl = Repl {
        interpreter: UiInterpreter::new(local_sink),
        local_events,
        host_events: handle.events.clone(),
        rendered: None,
        min_pass: 1,
        printed_pass: 0,
        reported_failure: false,
    };

    let mut lines = spawn_stdin_lines();
    let mut backlog: VecDeque<String> = VecDeque::new();
    let mut pending: Option<PendingPrompt> = None;
    let mut eof = false;

    'repl: loop {
        let frame = frames.borrow_and_update().clone();
        repl.show(&frame);

        while let Some(line) = backlog.pop_front() {
            if let Some(prompt) = pending.take() {
                match Decision::parse(&line) {
                    Some(decision) => prompt.respond(decision),
                    None => {
                        println!("answer d, o or a");
                        pending = Some(prompt);
                    }
                }
                continue;
            }
            if !repl.settled(&frame) {
                backlog.push_front(line);
                break;
            }
            if let Outcome::Quit = repl.execute(&line, &frame, &handle.permissions) {
                break 'repl;
            }
            if !repl.settled(&frames.borrow()) {
                continue 'repl;
            }
        }

        if eof && backlog.is_empty() && pending.is_none() {
            break;
        }

        tokio::select! {
            changed = frames.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            prompt = next_prompt(&mut prompts) => match prompt {
                Some(prompt) => {
                    print_request(&prompt.request);
                    pending = Some(prompt);
                }
                None => prompts = None,
            },
            line = lines.recv(), if !eof => match line {
                Some(line) => backlog.push_back(line),
                None => eof = true,
            },
        }

        // Input ran out while a prompt is open: treat it as abandoned.
        if eof && backlog.is_empty() {
            pending = None;
        }
    }

    // Unanswered and future prompts resolve to deny.
    drop(pending);
    drop(prompts);
    let host = handle.shutdown().await.context("Host task panicked")?;

    let final_frame = host.subscribe().borrow().clone();
    repl.show(&final_frame);
    Ok(())
}
