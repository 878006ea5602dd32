//! Discord adapter
//!
//! [`DiscordPlatform`] implements the [`ChatPlatform`] seam over serenity's
//! HTTP client, and [`Handler`] turns gateway events into dispatcher calls
//! and [`ReactionEvent`]s.

use async_trait::async_trait;
use dao_governance::{
    ChannelId, ChatPlatform, CommandDispatcher, CommandInvocation, CommandSpec, EmbedSnapshot,
    MessageId, OptionToken, PlatformError, ProposalManager, ReactionEvent, UserId, COMMANDS,
};
use serenity::all::{
    Command, CommandDataOptionValue, CommandInteraction, CommandOptionType, Context,
    CreateCommand, CreateCommandOption, CreateEmbed, CreateEmbedAuthor, CreateEmbedFooter,
    CreateInteractionResponse, CreateInteractionResponseMessage, CreateMessage, EditMessage,
    EventHandler, GuildId, Http, Interaction, Permissions, Reaction, ReactionType, Ready,
    Timestamp,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// ==================== Platform ====================

pub struct DiscordPlatform {
    http: Arc<Http>,
}

impl DiscordPlatform {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

fn channel_id(channel: ChannelId) -> serenity::all::ChannelId {
    serenity::all::ChannelId::new(channel.0)
}

fn message_id(message: MessageId) -> serenity::all::MessageId {
    serenity::all::MessageId::new(message.0)
}

fn reaction_type(token: &OptionToken) -> Result<ReactionType, PlatformError> {
    ReactionType::try_from(token.as_str())
        .map_err(|_| PlatformError::UnsupportedToken(token.to_string()))
}

fn request_error(e: serenity::Error) -> PlatformError {
    PlatformError::Request(e.to_string())
}

fn is_not_found(e: &serenity::Error) -> bool {
    match e {
        serenity::Error::Http(http) => http.status_code().map(|s| s.as_u16()) == Some(404),
        _ => false,
    }
}

fn build_embed(snapshot: &EmbedSnapshot) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title(&snapshot.title)
        .description(&snapshot.description)
        .author(CreateEmbedAuthor::new(&snapshot.author))
        .footer(CreateEmbedFooter::new(&snapshot.footer));
    if let Ok(timestamp) = Timestamp::from_unix_timestamp(snapshot.timestamp.timestamp()) {
        embed = embed.timestamp(timestamp);
    }
    for field in &snapshot.fields {
        embed = embed.field(&field.name, &field.value, field.inline);
    }
    embed
}

#[async_trait]
impl ChatPlatform for DiscordPlatform {
    async fn send_embed(
        &self,
        channel: ChannelId,
        embed: &EmbedSnapshot,
    ) -> Result<MessageId, PlatformError> {
        let message = channel_id(channel)
            .send_message(&self.http, CreateMessage::new().embed(build_embed(embed)))
            .await
            .map_err(request_error)?;
        Ok(MessageId(message.id.get()))
    }

    async fn edit_embed(
        &self,
        channel: ChannelId,
        message: MessageId,
        embed: &EmbedSnapshot,
    ) -> Result<(), PlatformError> {
        channel_id(channel)
            .edit_message(
                &self.http,
                message_id(message),
                EditMessage::new().embed(build_embed(embed)),
            )
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    PlatformError::MessageNotFound(message)
                } else {
                    request_error(e)
                }
            })?;
        Ok(())
    }

    async fn react(
        &self,
        channel: ChannelId,
        message: MessageId,
        token: &OptionToken,
    ) -> Result<(), PlatformError> {
        channel_id(channel)
            .create_reaction(&self.http, message_id(message), reaction_type(token)?)
            .await
            .map_err(request_error)
    }

    async fn remove_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        user: UserId,
        token: &OptionToken,
    ) -> Result<(), PlatformError> {
        channel_id(channel)
            .delete_reaction(
                &self.http,
                message_id(message),
                Some(serenity::all::UserId::new(user.0)),
                reaction_type(token)?,
            )
            .await
            .map_err(request_error)
    }
}

// ==================== Gateway events ====================

pub struct Handler {
    dispatcher: Arc<CommandDispatcher>,
    proposals: Arc<ProposalManager>,
    guild: Option<u64>,
}

impl Handler {
    pub fn new(
        dispatcher: Arc<CommandDispatcher>,
        proposals: Arc<ProposalManager>,
        guild: Option<u64>,
    ) -> Self {
        Self {
            dispatcher,
            proposals,
            guild,
        }
    }

    async fn register_commands(&self, ctx: &Context) -> serenity::Result<()> {
        let commands: Vec<CreateCommand> = COMMANDS.iter().map(create_command).collect();

        match self.guild {
            Some(guild) => {
                GuildId::new(guild).set_commands(&ctx.http, commands).await?;
                info!(guild_id = guild, count = COMMANDS.len(), "Guild commands registered");
            }
            None => {
                Command::set_global_commands(&ctx.http, commands).await?;
                info!(count = COMMANDS.len(), "Global commands registered");
            }
        }
        Ok(())
    }

    async fn on_reaction(&self, reaction: &Reaction, added: bool) {
        let Some(user) = reaction.user_id else {
            return;
        };
        let message = MessageId(reaction.message_id.get());
        let user = UserId(user.get());
        let token = reaction.emoji.to_string();
        let event = if added {
            ReactionEvent::added(message, user, token)
        } else {
            ReactionEvent::removed(message, user, token)
        };
        if !self.proposals.dispatch(event).await {
            debug!(message_id = %message, "Reaction on a message that is not an open proposal");
        }
    }
}

/// Admin commands are hidden from members without Manage Server
fn create_command(spec: &CommandSpec) -> CreateCommand {
    let command = spec.options.iter().fold(
        CreateCommand::new(spec.name).description(spec.description),
        |command, option| {
            command.add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    option.name,
                    option.description,
                )
                .required(option.required),
            )
        },
    );
    if spec.admin {
        command.default_member_permissions(Permissions::MANAGE_GUILD)
    } else {
        command
    }
}

fn invocation(command: &CommandInteraction) -> CommandInvocation {
    let options: HashMap<String, String> = command
        .data
        .options
        .iter()
        .filter_map(|option| match &option.value {
            CommandDataOptionValue::String(value) => Some((option.name.clone(), value.clone())),
            _ => None,
        })
        .collect();
    let display_name = command
        .member
        .as_ref()
        .and_then(|m| m.nick.clone())
        .or_else(|| command.user.global_name.clone())
        .unwrap_or_else(|| command.user.name.clone());

    let is_admin = command
        .member
        .as_ref()
        .and_then(|m| m.permissions)
        .is_some_and(|p| p.manage_guild());

    CommandInvocation {
        name: command.data.name.clone(),
        user: UserId(command.user.id.get()),
        display_name,
        channel: ChannelId(command.channel_id.get()),
        is_admin,
        options,
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, user_id = %ready.user.id, "Connected to Discord");
        if let Err(e) = self.register_commands(&ctx).await {
            error!(error = %e, "Failed to register slash commands");
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(command) = interaction else {
            return;
        };
        let reply = self.dispatcher.dispatch(&invocation(&command)).await;
        let response = CreateInteractionResponse::Message(
            CreateInteractionResponseMessage::new()
                .content(reply.content)
                .ephemeral(reply.ephemeral),
        );
        if let Err(e) = command.create_response(&ctx.http, response).await {
            warn!(command = %command.data.name, error = %e, "Failed to answer command");
        }
    }

    async fn reaction_add(&self, _ctx: Context, reaction: Reaction) {
        self.on_reaction(&reaction, true).await;
    }

    async fn reaction_remove(&self, _ctx: Context, reaction: Reaction) {
        self.on_reaction(&reaction, false).await;
    }
}
