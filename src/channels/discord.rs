//! Discord surface: outbound publisher, slash commands and the link filter.

use std::sync::Arc;

use async_trait::async_trait;
use serenity::all::{
    ActivityData, ChannelId, Command, CommandDataOptionValue, CommandInteraction,
    CommandOptionType, Context, CreateCommand, CreateCommandOption, CreateEmbed,
    CreateInteractionResponse, CreateInteractionResponseMessage, EventHandler, GatewayIntents,
    Http, HttpError, Interaction, Mentionable, Message, MessageId, MessageUpdateEvent,
    Permissions, Ready, User,
};
use tracing::{debug, error, info, warn};

use crate::channels::Publisher;
use crate::error::{CommandError, PublishError, ValidationError};
use crate::links::LinkRewriter;
use crate::registrations::{Caller, RegistrationService};
use crate::store::Account;

const EMBED_COLOUR: u32 = 0x819aff;
const WARNING_COLOUR: u32 = 0xf1c40f;

/// Posts relay messages through serenity's HTTP client.
pub struct DiscordPublisher {
    http: Arc<Http>,
}

impl DiscordPublisher {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

/// Parse a snowflake channel id. Zero is not a valid snowflake.
pub fn parse_channel_id(channel_id: &str) -> Result<ChannelId, PublishError> {
    match channel_id.trim().parse::<u64>() {
        Ok(id) if id != 0 => Ok(ChannelId::new(id)),
        _ => Err(PublishError::InvalidChannel {
            channel: channel_id.to_string(),
        }),
    }
}

/// Map an unsuccessful HTTP status to a publish error.
pub fn classify_status(channel_id: &str, status: u16, reason: String) -> PublishError {
    let channel = channel_id.to_string();
    match status {
        404 => PublishError::ChannelNotFound { channel },
        403 => PublishError::Forbidden { channel, reason },
        429 => PublishError::RateLimited { channel },
        _ => PublishError::Rejected { channel, reason },
    }
}

fn map_send_error(channel_id: &str, err: serenity::Error) -> PublishError {
    match err {
        serenity::Error::Http(HttpError::UnsuccessfulRequest(resp)) => classify_status(
            channel_id,
            resp.status_code.as_u16(),
            resp.error.message.clone(),
        ),
        other => PublishError::Rejected {
            channel: channel_id.to_string(),
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl Publisher for DiscordPublisher {
    async fn publish(&self, channel_id: &str, content: &str) -> Result<(), PublishError> {
        let channel = parse_channel_id(channel_id)?;
        channel
            .say(self.http.as_ref(), content)
            .await
            .map_err(|e| map_send_error(channel_id, e))?;
        debug!(channel = channel_id, "Published message");
        Ok(())
    }
}

/// Text reposted in place of a message that carried source links.
pub fn repost_text(rewritten: &str, author: &User) -> String {
    format!("{rewritten} from {}", author.mention())
}

/// Slash commands registered on ready.
pub fn command_definitions() -> Vec<CreateCommand> {
    let account = || {
        CreateCommandOption::new(
            CommandOptionType::String,
            "account",
            "Account handle, without the @",
        )
        .required(true)
    };

    vec![
        CreateCommand::new("add")
            .description("Relay an account's posts into a channel")
            .default_member_permissions(Permissions::ADMINISTRATOR)
            .add_option(account())
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::Channel,
                    "channel",
                    "Channel that receives the posts",
                )
                .required(true),
            ),
        CreateCommand::new("list")
            .description("Show the accounts relayed in this server")
            .default_member_permissions(Permissions::ADMINISTRATOR),
        CreateCommand::new("remove")
            .description("Stop relaying an account")
            .default_member_permissions(Permissions::ADMINISTRATOR)
            .add_option(account()),
    ]
}

/// One line per registration for the `list` reply.
pub fn format_accounts(accounts: &[Account]) -> String {
    if accounts.is_empty() {
        return "No accounts are being relayed.".to_string();
    }
    accounts
        .iter()
        .map(|a| format!("@{} → <#{}>", a.source_account_id, a.destination_channel_id))
        .collect::<Vec<_>>()
        .join("\n")
}

fn option_string(command: &CommandInteraction, name: &str) -> String {
    command
        .data
        .options
        .iter()
        .find(|o| o.name == name)
        .map(|o| match &o.value {
            CommandDataOptionValue::Channel(id) => id.to_string(),
            other => other.as_str().unwrap_or_default().to_string(),
        })
        .unwrap_or_default()
}

/// Gateway event handler.
pub struct DiscordHandler {
    registrations: Arc<RegistrationService>,
    links: LinkRewriter,
    watching: String,
}

impl DiscordHandler {
    pub fn new(registrations: Arc<RegistrationService>, links: LinkRewriter, watching: String) -> Self {
        Self {
            registrations,
            links,
            watching,
        }
    }

    /// Required gateway intents for the bot.
    pub fn intents() -> GatewayIntents {
        GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT
    }

    async fn filter_links(
        &self,
        ctx: &Context,
        channel_id: ChannelId,
        message_id: MessageId,
        author: &User,
        content: &str,
    ) {
        if author.id == ctx.cache.current_user().id {
            return;
        }
        if !LinkRewriter::has_source_link(content) {
            return;
        }

        let rewritten = self.links.rewrite_message(content);
        if let Err(e) = channel_id
            .say(&ctx.http, repost_text(&rewritten, author))
            .await
        {
            warn!(channel = %channel_id, error = %e, "Failed to repost rewritten message");
            return;
        }
        if let Err(e) = channel_id.delete_message(&ctx.http, message_id).await {
            warn!(
                channel = %channel_id,
                message = %message_id,
                error = %e,
                "Failed to delete original message"
            );
        }
    }

    async fn run_command(&self, command: &CommandInteraction) -> Result<CreateEmbed, CommandError> {
        let scope = command
            .guild_id
            .ok_or(ValidationError::MissingScope)?
            .to_string();
        let caller = Caller {
            is_admin: command
                .member
                .as_ref()
                .and_then(|m| m.permissions)
                .is_some_and(|p| p.administrator()),
        };

        let embed = match command.data.name.as_str() {
            "add" => {
                let account = self
                    .registrations
                    .add(
                        caller,
                        &scope,
                        &option_string(command, "account"),
                        &option_string(command, "channel"),
                    )
                    .await?;
                CreateEmbed::new()
                    .title("Account added")
                    .description(format!(
                        "Posts from @{} will be relayed to <#{}>.",
                        account.source_account_id, account.destination_channel_id
                    ))
            }
            "list" => {
                let accounts = self.registrations.list(caller, &scope).await?;
                CreateEmbed::new()
                    .title("Relayed accounts")
                    .description(format_accounts(&accounts))
                    .field(
                        "Usage",
                        format!("{}/{}", accounts.len(), self.registrations.accounts_limit()),
                        true,
                    )
            }
            "remove" => {
                let account = option_string(command, "account");
                self.registrations.remove(caller, &scope, &account).await?;
                CreateEmbed::new()
                    .title("Account removed")
                    .description(format!(
                        "@{} is no longer relayed.",
                        account.trim().trim_start_matches('@')
                    ))
            }
            other => {
                debug!(command = other, "Ignoring unknown command");
                CreateEmbed::new()
                    .title("Unknown command")
                    .description(format!("`/{other}` is not handled by this bot."))
            }
        };
        Ok(embed.colour(EMBED_COLOUR))
    }
}

#[async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(
            bot_name = %ready.user.name,
            guilds = ready.guilds.len(),
            "Discord bot ready"
        );
        ctx.set_activity(Some(ActivityData::watching(self.watching.as_str())));

        match Command::set_global_commands(&ctx.http, command_definitions()).await {
            Ok(commands) => info!(count = commands.len(), "Registered slash commands"),
            Err(e) => error!(error = %e, "Failed to register slash commands"),
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        self.filter_links(&ctx, msg.channel_id, msg.id, &msg.author, &msg.content)
            .await;
    }

    async fn message_update(
        &self,
        ctx: Context,
        _old_if_available: Option<Message>,
        _new: Option<Message>,
        event: MessageUpdateEvent,
    ) {
        let (Some(author), Some(content)) = (event.author.as_ref(), event.content.as_deref())
        else {
            return;
        };
        self.filter_links(&ctx, event.channel_id, event.id, author, content)
            .await;
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(command) = interaction else {
            return;
        };

        let embed = match self.run_command(&command).await {
            Ok(embed) => embed,
            Err(CommandError::Database(e)) => {
                error!(command = %command.data.name, error = %e, "Command failed");
                CreateEmbed::new()
                    .title("Something went wrong")
                    .description("The command could not be completed. Try again later.")
                    .colour(WARNING_COLOUR)
            }
            Err(e) => CreateEmbed::new()
                .title("Warning")
                .description(e.to_string())
                .colour(WARNING_COLOUR),
        };

        let response =
            CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().embed(embed));
        if let Err(e) = command.create_response(&ctx.http, response).await {
            warn!(command = %command.data.name, error = %e, "Failed to answer interaction");
        }
    }
}

/// Remove every global command this bot registered.
pub async fn deregister_commands(http: &Http) -> Result<usize, serenity::Error> {
    let commands = Command::get_global_commands(http).await?;
    for command in &commands {
        Command::delete_global_command(http, command.id).await?;
    }
    Ok(commands.len())
}
