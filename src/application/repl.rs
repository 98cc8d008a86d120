use std::io::Write as _;
use std::path::Path;

use anyhow::Result;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use yansi::Paint;

use crate::domain::models::Attachment;
use crate::domain::models::Author;
use crate::domain::models::Event;
use crate::domain::models::SlashCommand;
use crate::domain::services::ChatController;
use crate::domain::services::Effect;
use crate::domain::services::Sessions;

pub fn help_text() -> String {
    let text = r#"
COMMANDS:
- /stop (/s) - Stop the answer being generated, keeping what has arrived so far.
- /retry (/r) - Send your last prompt again and regenerate its answer.
- /edit (/e) [INDEX?] PROMPT - Rewrite a previous prompt and regenerate only its paired answer. Without an INDEX the last prompt is edited.
- /attach (/a) PATH PROMPT - Send a prompt with a file attached.
- /new (/n) - Start a fresh session.
- /help (/h) - Provides this help menu.
- /quit /exit (/q) - Exit Rivulet.

Anything else you type is sent to the assistant as a prompt.
        "#;

    return text.trim().to_string();
}

enum Flow {
    Continue,
    Quit,
}

fn print_agent_label() {
    print!("{}: ", Paint::magenta(Author::Agent.to_string()).bold());
    let _ = std::io::stdout().flush();
}

fn print_note(text: &str) {
    println!("{}", Paint::new(text).dimmed());
}

async fn snapshot(controller: &ChatController, sessions: &Sessions, session_id: &str) {
    let Some(session) = controller.store().session(session_id) else {
        return;
    };
    if let Err(err) = sessions.save(session).await {
        tracing::error!(error = ?err, "failed to persist session");
    }
}

fn last_user_index(controller: &ChatController) -> Option<usize> {
    return controller
        .store()
        .current()
        .messages
        .iter()
        .rposition(|message| return message.author == Author::User);
}

async fn handle_line(controller: &mut ChatController, line: &str) -> Result<Flow> {
    let input = line.trim();
    if input.is_empty() {
        return Ok(Flow::Continue);
    }

    let Some(command) = SlashCommand::parse(input) else {
        controller.send(input, None);
        print_agent_label();
        return Ok(Flow::Continue);
    };

    if command.is_quit() {
        return Ok(Flow::Quit);
    }

    if command.is_help() {
        println!("{}", help_text());
        return Ok(Flow::Continue);
    }

    if command.is_stop() {
        controller.stop();
        print_note("Stopped. Whatever had arrived stays in place.");
        return Ok(Flow::Continue);
    }

    if command.is_new_session() {
        controller.new_session();
        print_note("Started a fresh session.");
        return Ok(Flow::Continue);
    }

    if command.is_retry() {
        let Some(index) = last_user_index(controller) else {
            print_note("There's nothing to retry yet.");
            return Ok(Flow::Continue);
        };
        let (prompt, attachment) = {
            let message = &controller.store().current().messages[index];
            (message.text.to_string(), message.attachment.clone())
        };
        controller.edit_and_resend(index, &prompt, attachment);
        print_agent_label();
        return Ok(Flow::Continue);
    }

    if command.is_edit() {
        if command.args.is_empty() {
            print_note("Usage: /edit [INDEX] PROMPT");
            return Ok(Flow::Continue);
        }

        let (index, prompt_args) = match command.args[0].parse::<usize>() {
            Ok(index) if command.args.len() > 1 => (Some(index), &command.args[1..]),
            _ => (last_user_index(controller), &command.args[..]),
        };
        let Some(index) = index else {
            print_note("There's no prompt to edit yet.");
            return Ok(Flow::Continue);
        };

        let prompt = prompt_args.join(" ");
        if controller.edit_and_resend(index, &prompt, None).is_none() {
            print_note("That index doesn't point at one of your prompts.");
            return Ok(Flow::Continue);
        }
        print_agent_label();
        return Ok(Flow::Continue);
    }

    if command.is_attach() {
        if command.args.len() < 2 {
            print_note("Usage: /attach PATH PROMPT");
            return Ok(Flow::Continue);
        }

        let attachment = match Attachment::from_file(Path::new(&command.args[0])).await {
            Ok(attachment) => attachment,
            Err(err) => {
                println!("{}", Paint::red(format!("Couldn't attach that file: {err}")));
                return Ok(Flow::Continue);
            }
        };
        let prompt = command.args[1..].join(" ");
        controller.send(&prompt, Some(attachment));
        print_agent_label();
        return Ok(Flow::Continue);
    }

    return Ok(Flow::Continue);
}

async fn handle_effect(
    controller: &mut ChatController,
    sessions: &Sessions,
    event: Event,
) {
    let visible_session = controller.store().current_id().to_string();
    match controller.handle_event(event) {
        Effect::Chunk(chunk) => {
            print!("{chunk}");
            let _ = std::io::stdout().flush();
        }
        Effect::StreamDone { session_id } => {
            if session_id == visible_session {
                println!();
            }
            snapshot(controller, sessions, &session_id).await;
        }
        Effect::StreamInterrupted { session_id } => {
            if session_id == visible_session {
                println!();
                println!(
                    "{}",
                    Paint::red("The connection dropped mid-answer. The partial answer was kept.")
                );
            }
            snapshot(controller, sessions, &session_id).await;
        }
        Effect::AtomicAnswer {
            session_id,
            text,
            errored,
        } => {
            if session_id == visible_session {
                if errored {
                    println!("{}", Paint::red(text));
                } else {
                    println!("{text}");
                }
            }
            snapshot(controller, sessions, &session_id).await;
        }
        Effect::Quiet => {}
    }
}

/// Line-oriented chat loop: one task owns the controller and interleaves
/// stdin lines with transport and fallback events.
pub async fn start(
    mut controller: ChatController,
    mut event_rx: mpsc::UnboundedReceiver<Event>,
) -> Result<()> {
    let sessions = Sessions::default();
    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();

    print_note("Hey there! What can I do for you? /help lists the commands.");

    loop {
        tokio::select! {
            line = stdin_lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if matches!(handle_line(&mut controller, &line).await?, Flow::Quit) {
                    break;
                }
            }
            event = event_rx.recv() => {
                let Some(event) = event else {
                    break;
                };
                handle_effect(&mut controller, &sessions, event).await;
            }
        }
    }

    controller.stop();
    let current_id = controller.store().current_id().to_string();
    if !controller.store().current().messages.is_empty() {
        snapshot(&controller, &sessions, &current_id).await;
    }

    return Ok(());
}
