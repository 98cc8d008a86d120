use super::SlashCommand;

#[test]
fn it_parse_empty_string() {
    assert!(SlashCommand::parse("").is_none());
}

#[test]
fn it_parse_space_only() {
    assert!(SlashCommand::parse(" ").is_none());
}

#[test]
fn it_parse_single_slash() {
    assert!(SlashCommand::parse("/").is_none());
}

#[test]
fn it_parse_invalid_prefix() {
    assert!(SlashCommand::parse("!q").is_none());
}

#[test]
fn it_parse_plain_text() {
    assert!(SlashCommand::parse("tell me about rust").is_none());
}

#[test]
fn it_is_short_quit() {
    let cmd = SlashCommand::parse("/q").unwrap();
    assert!(cmd.is_quit());
}

#[test]
fn it_is_exit() {
    let cmd = SlashCommand::parse("/exit").unwrap();
    assert!(cmd.is_quit());
}

#[test]
fn it_is_stop() {
    let cmd = SlashCommand::parse("/stop").unwrap();
    assert!(cmd.is_stop());
}

#[test]
fn it_is_not_stop() {
    let cmd = SlashCommand::parse("/quit").unwrap();
    assert!(!cmd.is_stop());
}

#[test]
fn it_is_retry() {
    let cmd = SlashCommand::parse("/retry").unwrap();
    assert!(cmd.is_retry());
}

#[test]
fn it_is_edit_with_args() {
    let cmd = SlashCommand::parse("/edit 0 new prompt text").unwrap();
    assert!(cmd.is_edit());
    assert_eq!(cmd.args, vec!["0", "new", "prompt", "text"]);
}

#[test]
fn it_is_attach() {
    let cmd = SlashCommand::parse("/attach ./notes.txt summarize this").unwrap();
    assert!(cmd.is_attach());
    assert_eq!(cmd.args[0], "./notes.txt");
}

#[test]
fn it_is_new_session() {
    let cmd = SlashCommand::parse("/new").unwrap();
    assert!(cmd.is_new_session());
}

#[test]
fn it_is_help() {
    let cmd = SlashCommand::parse("/h").unwrap();
    assert!(cmd.is_help());
}
