#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    pub arg_key: &'static str,
}

/// Commands whose whole remainder is one free-text argument.
pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "query",
        action: "set_query",
        arg_key: "query",
    },
    CommandSpec {
        command: "ask",
        action: "ask",
        arg_key: "question",
    },
    CommandSpec {
        command: "model",
        action: "set_model",
        arg_key: "model",
    },
];

pub(crate) const MULTI_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "add",
        action: "add_images",
        arg_key: "paths",
    },
    CommandSpec {
        command: "upload",
        action: "add_images",
        arg_key: "paths",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "generate",
        action: "generate",
        arg_key: "",
    },
    CommandSpec {
        command: "images",
        action: "list_images",
        arg_key: "",
    },
    CommandSpec {
        command: "show",
        action: "show",
        arg_key: "",
    },
    CommandSpec {
        command: "status",
        action: "status",
        arg_key: "",
    },
    CommandSpec {
        command: "help",
        action: "help",
        arg_key: "",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
        arg_key: "",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
        arg_key: "",
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/add PATH...",
    "/query TEXT",
    "/generate",
    "/ask QUESTION",
    "/images",
    "/show",
    "/model ID",
    "/status",
    "/help",
    "/quit",
];
