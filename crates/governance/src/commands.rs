//! Slash-command dispatcher
//!
//! Routes an invocation by name and always answers with exactly one
//! [`Reply`]. Replies that only concern the invoking user are ephemeral.

use crate::proposal::{parse_options, ProposalDraft, ProposalError, ProposalManager};
use crate::registry::{Identifier, IdentityRegistry, RegistryError, Unregistered};
use crate::types::{Address, ChannelId, MessageId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const REGISTER: &str = "register";
pub const UNREGISTER: &str = "unregister";
pub const PROPOSAL: &str = "proposal";
pub const GET_ADDRESS: &str = "get-address";
pub const GET_USER: &str = "get-user";
pub const CLOSE_PROPOSAL: &str = "close-proposal";

const UNKNOWN_COMMAND: &str =
    "Sorry, something went wrong, or you do not have access to these commands.";
const TRY_AGAIN: &str = "Something went wrong, please try again.";

/// String option of a slash command
#[derive(Clone, Copy, Debug)]
pub struct OptionSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
}

/// Slash command definition, used to register the commands with the platform
#[derive(Clone, Copy, Debug)]
pub struct CommandSpec {
    pub name: &'static str,
    pub description: &'static str,
    /// Restricted to server managers
    pub admin: bool,
    pub options: &'static [OptionSpec],
}

/// Definition of the command called `name`
pub fn command_spec(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.name == name)
}

const ADDRESS_OPTION: OptionSpec = OptionSpec {
    name: "address",
    description: "Wallet address (0x...)",
    required: false,
};

const USER_OPTION: OptionSpec = OptionSpec {
    name: "user",
    description: "User id or mention",
    required: false,
};

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: REGISTER,
        description: "Register your wallet address",
        admin: false,
        options: &[OptionSpec {
            required: true,
            ..ADDRESS_OPTION
        }],
    },
    CommandSpec {
        name: UNREGISTER,
        description: "Remove a registration by address or user",
        admin: true,
        options: &[ADDRESS_OPTION, USER_OPTION],
    },
    CommandSpec {
        name: PROPOSAL,
        description: "Create a token-weighted proposal",
        admin: false,
        options: &[
            OptionSpec {
                name: "title",
                description: "Proposal title",
                required: true,
            },
            OptionSpec {
                name: "description",
                description: "What is being decided",
                required: true,
            },
            OptionSpec {
                name: "reactions",
                description: "Comma-separated voting options, e.g. 👍,👎",
                required: true,
            },
        ],
    },
    CommandSpec {
        name: GET_ADDRESS,
        description: "Show the address registered to a user",
        admin: false,
        options: &[USER_OPTION, ADDRESS_OPTION],
    },
    CommandSpec {
        name: GET_USER,
        description: "Show the user owning an address",
        admin: false,
        options: &[ADDRESS_OPTION, USER_OPTION],
    },
    CommandSpec {
        name: CLOSE_PROPOSAL,
        description: "Close a proposal and show the result",
        admin: true,
        options: &[OptionSpec {
            name: "message",
            description: "Message id of the proposal",
            required: true,
        }],
    },
];

/// One slash-command call
#[derive(Clone, Debug, Default)]
pub struct CommandInvocation {
    pub name: String,
    pub user: UserId,
    pub display_name: String,
    pub channel: ChannelId,
    /// Invoker may manage the server
    pub is_admin: bool,
    pub options: HashMap<String, String>,
}

impl CommandInvocation {
    /// Non-blank string option
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub content: String,
    pub ephemeral: bool,
}

impl Reply {
    pub fn private(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: true,
        }
    }

    pub fn public(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: false,
        }
    }
}

pub struct CommandDispatcher {
    registry: IdentityRegistry,
    proposals: Arc<ProposalManager>,
}

impl CommandDispatcher {
    pub fn new(registry: IdentityRegistry, proposals: Arc<ProposalManager>) -> Self {
        Self {
            registry,
            proposals,
        }
    }

    pub async fn dispatch(&self, invocation: &CommandInvocation) -> Reply {
        info!(
            command = %invocation.name,
            user_id = %invocation.user,
            channel_id = %invocation.channel,
            "Command received"
        );
        let restricted = command_spec(&invocation.name).is_some_and(|spec| spec.admin);
        if restricted && !invocation.is_admin {
            warn!(
                command = %invocation.name,
                user_id = %invocation.user,
                "Admin command refused"
            );
            return Reply::private(UNKNOWN_COMMAND);
        }

        match invocation.name.as_str() {
            REGISTER => self.register(invocation).await,
            UNREGISTER => self.unregister(invocation).await,
            PROPOSAL => self.proposal(invocation).await,
            GET_ADDRESS | GET_USER => self.lookup(invocation).await,
            CLOSE_PROPOSAL => self.close(invocation).await,
            _ => Reply::private(UNKNOWN_COMMAND),
        }
    }

    async fn register(&self, invocation: &CommandInvocation) -> Reply {
        let Some(raw) = invocation.option("address") else {
            return Reply::private("Please provide the address to register.");
        };
        let address: Address = match raw.parse() {
            Ok(address) => address,
            Err(e) => return Reply::private(format!("{raw} is not a valid address: {e}")),
        };

        match self.registry.register(invocation.user, &address).await {
            Ok(()) => Reply::private(format!("You have successfully registered: {address}")),
            Err(RegistryError::AlreadyRegistered { address }) => Reply::private(format!(
                "You have already registered this address: {address} \nIf you would like to change your address, please contact an admin."
            )),
            Err(RegistryError::AddressClaimed { .. }) => Reply::private(
                "This address has already been registered to another user. \nIf there is an issue, please contact an admin.",
            ),
            Err(e) => {
                error!(user_id = %invocation.user, error = %e, "Registration failed");
                Reply::private(TRY_AGAIN)
            }
        }
    }

    async fn unregister(&self, invocation: &CommandInvocation) -> Reply {
        let identifier = match target(invocation) {
            Ok(identifier) => identifier,
            Err(reply) => return reply,
        };

        match self.registry.unregister(&identifier).await {
            Ok(Unregistered::Removed { .. }) => {
                Reply::private(format!("{identifier} has been unregistered."))
            }
            Ok(Unregistered::NotFound) => Reply::private(format!("{identifier} is not registered.")),
            Err(e) => {
                error!(identifier = %identifier, error = %e, "Unregistration failed");
                Reply::private(TRY_AGAIN)
            }
        }
    }

    async fn lookup(&self, invocation: &CommandInvocation) -> Reply {
        let identifier = match target(invocation) {
            Ok(identifier) => identifier,
            Err(reply) => return reply,
        };

        let found = match self.registry.lookup(&identifier).await {
            Ok(found) => found,
            Err(e) => {
                error!(identifier = %identifier, error = %e, "Lookup failed");
                return Reply::private(TRY_AGAIN);
            }
        };

        let content = match (&identifier, found) {
            (Identifier::User(user), Some(address)) => format!("{user}'s address is: {address}"),
            (Identifier::User(user), None) => format!("{user} has not registered an address."),
            (Identifier::Address(address), Some(user)) => {
                format!("{address} is registered to: {user}")
            }
            (Identifier::Address(address), None) => format!("{address} is not registered."),
        };
        Reply::private(content)
    }

    async fn proposal(&self, invocation: &CommandInvocation) -> Reply {
        let (Some(title), Some(raw_options)) =
            (invocation.option("title"), invocation.option("reactions"))
        else {
            return Reply::private("A proposal needs a title and a list of reactions.");
        };
        let options = match parse_options(raw_options) {
            Ok(options) => options,
            Err(e) => return Reply::private(e.to_string()),
        };

        let draft = ProposalDraft {
            title: title.to_string(),
            description: invocation.option("description").unwrap_or_default().to_string(),
            author: invocation.display_name.clone(),
            options,
        };

        match self.proposals.open(invocation.channel, draft).await {
            Ok(message) => Reply::public(format!("Proposal sent! (id: {message})")),
            Err(ProposalError::Platform(e)) => {
                error!(channel_id = %invocation.channel, error = %e, "Failed to post proposal");
                Reply::private(TRY_AGAIN)
            }
            Err(e) => Reply::private(e.to_string()),
        }
    }

    async fn close(&self, invocation: &CommandInvocation) -> Reply {
        let Some(message) = invocation
            .option("message")
            .and_then(|raw| raw.parse::<MessageId>().ok())
        else {
            return Reply::private("Please provide the message id of the proposal.");
        };

        match self.proposals.close(message).await {
            Ok(tally) => {
                let result = tally
                    .iter()
                    .map(|(option, weight)| format!("{option}: {weight}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                Reply::public(format!("Proposal {message} closed. {result}"))
            }
            Err(ProposalError::NotFound(_)) => {
                Reply::private(format!("{message} is not an open proposal."))
            }
            Err(e) => {
                warn!(message_id = %message, error = %e, "Closing proposal failed");
                Reply::private(TRY_AGAIN)
            }
        }
    }
}

/// Registration side named by the `address` or `user` option, address first
fn target(invocation: &CommandInvocation) -> Result<Identifier, Reply> {
    if let Some(raw) = invocation.option("address") {
        return raw
            .parse()
            .map(Identifier::Address)
            .map_err(|e| Reply::private(format!("{raw} is not a valid address: {e}")));
    }
    if let Some(raw) = invocation.option("user") {
        return UserId::parse_mention(raw)
            .map(Identifier::User)
            .ok_or_else(|| Reply::private(format!("{raw} is not a valid user.")));
    }
    Err(Reply::private("Please provide an address or a user."))
}
