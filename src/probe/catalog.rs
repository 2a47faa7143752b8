//! Connection idiom catalog.
//!
//! Three tables drive probing:
//!
//! - [`connection_idioms`]: one half of a non-lexical connection across the
//!   eleven categories. Each pattern captures a `key` (or `ctrl` + `action`
//!   for controller routes) and optionally a `handler` naming the symbol
//!   on the receiving side.
//! - [`entry_idioms`]: external triggers that are not themselves one half
//!   of a connection (cron schedules, CLI commands, UI events).
//! - [`effect_idioms`]: externally observable effects that mark the
//!   enclosing symbol as a final outcome.
//!
//! Patterns are matched line by line. Within one line the first idiom to
//! claim a span wins, so specific idioms are listed before generic ones.

use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::types::{CandidateSide, EdgeKind, EffectKind, TriggerKind};

/// Where the owning symbol of a match is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// The innermost callable enclosing the match.
    Enclosing,
    /// The definition the matched decorator/annotation is attached to.
    Decorated,
}

/// One half of a connection.
#[derive(Debug)]
pub struct ConnectionIdiom {
    pub name: &'static str,
    pub kind: EdgeKind,
    pub side: CandidateSide,
    pub regex: Regex,
    pub anchor: Anchor,
    /// Receive-side idioms that are also external triggers.
    pub trigger: Option<TriggerKind>,
    /// Drop the match unless `handler` names a callable in the same file.
    pub requires_handler: bool,
    /// Use the decorated symbol's name as the key (e.g. Celery tasks).
    pub key_from_symbol: bool,
}

/// A trigger that designates an entry point without a connection.
#[derive(Debug)]
pub struct EntryIdiom {
    pub name: &'static str,
    pub trigger: TriggerKind,
    pub regex: Regex,
    pub anchor: Anchor,
}

/// A side effect that designates a final outcome.
#[derive(Debug)]
pub struct EffectIdiom {
    pub name: &'static str,
    pub effect: EffectKind,
    pub regex: Regex,
}

// ---------------------------------------------------------------------------
// Pattern tables
// ---------------------------------------------------------------------------

struct IdiomDef {
    name: &'static str,
    kind: EdgeKind,
    side: CandidateSide,
    pattern: &'static str,
    anchor: Anchor,
    trigger: Option<TriggerKind>,
    requires_handler: bool,
    key_from_symbol: bool,
}

fn emit(name: &'static str, kind: EdgeKind, pattern: &'static str) -> IdiomDef {
    IdiomDef {
        name,
        kind,
        side: CandidateSide::Emit,
        pattern,
        anchor: Anchor::Enclosing,
        trigger: None,
        requires_handler: false,
        key_from_symbol: false,
    }
}

fn receive(name: &'static str, kind: EdgeKind, pattern: &'static str) -> IdiomDef {
    IdiomDef {
        name,
        kind,
        side: CandidateSide::Receive,
        pattern,
        anchor: Anchor::Enclosing,
        trigger: None,
        requires_handler: false,
        key_from_symbol: false,
    }
}

impl IdiomDef {
    fn decorated(mut self) -> Self {
        self.anchor = Anchor::Decorated;
        self
    }

    fn triggers(mut self, trigger: TriggerKind) -> Self {
        self.trigger = Some(trigger);
        self
    }

    fn needs_handler(mut self) -> Self {
        self.requires_handler = true;
        self
    }

    fn keyed_by_symbol(mut self) -> Self {
        self.key_from_symbol = true;
        self
    }
}

/// Ordered: webhook and IPC before the generic HTTP and event idioms they
/// would otherwise overlap with.
fn connection_defs() -> Vec<IdiomDef> {
    use EdgeKind::*;
    vec![
        // -- webhook --------------------------------------------------------
        receive(
            "express_webhook_route",
            Webhook,
            r#"\b\w+\.(?:post|all|put)\(\s*['"`](?P<key>/[^'"`]*(?:webhook|hooks?)[^'"`]*)['"`]\s*(?:,\s*(?:\w+\s*,\s*)*(?P<handler>[A-Za-z_$][\w$.]*)\s*[,)])?"#,
        )
        .triggers(TriggerKind::Webhook),
        receive(
            "decorator_webhook_route",
            Webhook,
            r#"@\w+\.(?:route|post|api_route)\(\s*['"](?P<key>/[^'"]*(?:webhook|hooks?)[^'"]*)['"]"#,
        )
        .decorated()
        .triggers(TriggerKind::Webhook),
        emit(
            "webhook_url_registration",
            Webhook,
            r#"(?i)(?:webhook_?url|callback_?url|hook_?url)\s*[:=]\s*f?['"`](?:https?://[^/'"`]+)?(?P<key>/[^'"`]*)['"`]"#,
        ),
        // -- ipc ------------------------------------------------------------
        receive(
            "electron_ipc_main",
            Ipc,
            r#"\bipcMain\.(?:on|once|handle|handleOnce)\(\s*['"`](?P<key>[^'"`]+)['"`]\s*(?:,\s*(?P<handler>[A-Za-z_$][\w$.]*)\s*\))?"#,
        ),
        emit(
            "electron_ipc_renderer",
            Ipc,
            r#"\bipcRenderer\.(?:send|sendSync|invoke)\(\s*['"`](?P<key>[^'"`]+)['"`]"#,
        ),
        emit(
            "web_contents_send",
            Ipc,
            r#"\bwebContents\.send\(\s*['"`](?P<key>[^'"`]+)['"`]"#,
        ),
        receive(
            "ipc_renderer_on",
            Ipc,
            r#"\bipcRenderer\.on\(\s*['"`](?P<key>[^'"`]+)['"`]\s*(?:,\s*(?P<handler>[A-Za-z_$][\w$.]*)\s*\))?"#,
        ),
        emit(
            "post_message_typed",
            Ipc,
            r#"\.postMessage\(\s*\{\s*type\s*:\s*['"`](?P<key>[^'"`]+)['"`]"#,
        ),
        // -- message queue --------------------------------------------------
        receive(
            "amqp_consume",
            MessageQueue,
            r#"\.consume\(\s*['"`](?P<key>[^'"`]+)['"`]\s*(?:,\s*(?P<handler>[A-Za-z_$][\w$.]*)\s*[,)])?"#,
        )
        .triggers(TriggerKind::MessageConsumer),
        receive(
            "pika_basic_consume",
            MessageQueue,
            r#"\.basic_consume\([^)]*queue\s*=\s*['"](?P<key>[^'"]+)['"](?:[^)]*on_message_callback\s*=\s*(?P<handler>\w+))?"#,
        )
        .triggers(TriggerKind::MessageConsumer),
        receive(
            "kafkajs_subscribe",
            MessageQueue,
            r#"\bconsumer\.subscribe\(\s*\{\s*topics?\s*:\s*\[?\s*['"`](?P<key>[^'"`]+)['"`]"#,
        )
        .triggers(TriggerKind::MessageConsumer),
        receive(
            "spring_listener",
            MessageQueue,
            r#"@(?:KafkaListener|RabbitListener|JmsListener|SqsListener)\(\s*(?:(?:topics|queues|destination|value)\s*=\s*)?\{?\s*"(?P<key>[^"]+)""#,
        )
        .decorated()
        .triggers(TriggerKind::MessageConsumer),
        receive(
            "bullmq_worker",
            MessageQueue,
            r#"\bnew\s+Worker\(\s*['"`](?P<key>[^'"`]+)['"`]\s*(?:,\s*(?P<handler>[A-Za-z_$][\w$.]*)\s*[,)])?"#,
        )
        .triggers(TriggerKind::MessageConsumer),
        receive("celery_task", MessageQueue, r#"^\s*@(?:\w+\.)?(?:task|shared_task)\b"#)
            .decorated()
            .keyed_by_symbol()
            .triggers(TriggerKind::MessageConsumer),
        emit(
            "amqp_send_to_queue",
            MessageQueue,
            r#"\.sendToQueue\(\s*['"`](?P<key>[^'"`]+)['"`]"#,
        ),
        emit(
            "pika_basic_publish",
            MessageQueue,
            r#"\.basic_publish\([^)]*routing_key\s*=\s*['"](?P<key>[^'"]+)['"]"#,
        ),
        emit(
            "kafka_producer_send",
            MessageQueue,
            r#"\bproducer\.send\(\s*\{\s*topic\s*:\s*['"`](?P<key>[^'"`]+)['"`]"#,
        ),
        emit("bullmq_queue", MessageQueue, r#"\bnew\s+Queue\(\s*['"`](?P<key>[^'"`]+)['"`]"#),
        emit(
            "spring_template_send",
            MessageQueue,
            r#"\b(?:kafkaTemplate|rabbitTemplate|jmsTemplate)\.(?:send|convertAndSend)\(\s*"(?P<key>[^"]+)""#,
        ),
        emit("celery_delay", MessageQueue, r#"\b(?P<key>[A-Za-z_]\w*)\.(?:delay|apply_async)\("#),
        // -- http -----------------------------------------------------------
        receive(
            "express_route",
            Http,
            r#"\b(?:app|router|server|api|route[rs]?|r|e|g)\.(?:get|post|put|patch|delete|all|options|head)\(\s*['"`](?P<key>/[^'"`]*)['"`]\s*(?:,\s*(?:[A-Za-z_$][\w$.]*\s*,\s*)*(?P<handler>[A-Za-z_$][\w$.]*)\s*\))?"#,
        )
        .triggers(TriggerKind::HttpRoute),
        receive(
            "gin_route",
            Http,
            r#"\.(?:GET|POST|PUT|PATCH|DELETE|Any)\(\s*"(?P<key>/[^"]*)"\s*,\s*(?:[\w.]+\s*,\s*)*(?P<handler>[A-Za-z_][\w.]*)\s*\)"#,
        )
        .triggers(TriggerKind::HttpRoute),
        receive(
            "net_http_handle",
            Http,
            r#"\bHandle(?:Func)?\(\s*"(?:(?:GET|POST|PUT|PATCH|DELETE)\s+)?(?P<key>/[^"]*)"\s*,\s*(?P<handler>[A-Za-z_][\w.]*)"#,
        )
        .triggers(TriggerKind::HttpRoute),
        receive(
            "axum_route",
            Http,
            r#"\.route\(\s*"(?P<key>/[^"]*)"\s*,\s*(?:get|post|put|patch|delete|any)\(\s*(?P<handler>[A-Za-z_][\w:]*)\s*\)"#,
        )
        .triggers(TriggerKind::HttpRoute),
        receive(
            "actix_attribute_route",
            Http,
            r#"#\[(?:get|post|put|patch|delete)\(\s*"(?P<key>/[^"]*)""#,
        )
        .decorated()
        .triggers(TriggerKind::HttpRoute),
        receive(
            "python_decorator_route",
            Http,
            r#"@\w+\.(?:route|get|post|put|patch|delete|api_route)\(\s*['"](?P<key>/[^'"]*)['"]"#,
        )
        .decorated()
        .triggers(TriggerKind::HttpRoute),
        receive(
            "spring_mapping",
            Http,
            r#"@(?:Get|Post|Put|Patch|Delete|Request)Mapping\(\s*(?:(?:value|path)\s*=\s*)?"(?P<key>[^"]*)""#,
        )
        .decorated()
        .triggers(TriggerKind::HttpRoute),
        receive(
            "aspnet_attribute_route",
            Http,
            r#"\[(?:Http(?:Get|Post|Put|Patch|Delete)|Route)\(\s*"(?P<key>[^"]*)""#,
        )
        .decorated()
        .triggers(TriggerKind::HttpRoute),
        receive(
            "nest_route_decorator",
            Http,
            r#"@(?:Get|Post|Put|Patch|Delete|All)\(\s*['"`](?P<key>[^'"`]*)['"`]\s*\)"#,
        )
        .decorated()
        .triggers(TriggerKind::HttpRoute),
        receive(
            "django_path",
            Http,
            r#"\b(?:path|re_path|url)\(\s*r?['"]\^?(?P<key>[^'"]*)['"]\s*,\s*(?P<handler>[A-Za-z_][\w.]*)"#,
        )
        .needs_handler()
        .triggers(TriggerKind::HttpRoute),
        emit(
            "fetch_call",
            Http,
            r#"\bfetch\(\s*['"`](?:https?://[^/'"`]+)?(?P<key>/[^'"`?#]*)"#,
        ),
        emit(
            "axios_call",
            Http,
            r#"\b(?:axios|http|api|client|\$http)\.(?:get|post|put|patch|delete|request)\(\s*['"`](?:https?://[^/'"`]+)?(?P<key>/[^'"`?#]*)"#,
        ),
        emit(
            "python_requests",
            Http,
            r#"\b(?:requests|httpx|session|client)\.(?:get|post|put|patch|delete)\(\s*f?['"](?:https?://[^/'"]+)?(?P<key>/[^'"?#]*)"#,
        ),
        emit(
            "go_http_client",
            Http,
            r#"\bhttp\.(?:Get|Post|Head)\(\s*"(?:https?://[^/"]+)?(?P<key>/[^"?#]*)"#,
        ),
        // -- event ----------------------------------------------------------
        receive(
            "nest_on_event",
            Event,
            r#"@OnEvent\(\s*['"`](?P<key>[^'"`]+)['"`]"#,
        )
        .decorated(),
        receive(
            "emitter_on",
            Event,
            r#"\.(?:on|once|addListener|prependListener)\(\s*['"`](?P<key>[^'"`]+)['"`]\s*(?:,\s*(?P<handler>[A-Za-z_$][\w$.]*)\s*\))?"#,
        ),
        receive(
            "dom_custom_event_listener",
            Event,
            r#"\.addEventListener\(\s*['"`](?P<key>[\w.:-]+[.:-][\w.:-]+)['"`]\s*(?:,\s*(?P<handler>[A-Za-z_$][\w$.]*)\s*\))?"#,
        ),
        receive(
            "django_signal_receiver",
            Event,
            r#"@receiver\(\s*(?P<key>[A-Za-z_][\w.]*)"#,
        )
        .decorated(),
        emit("emitter_emit", Event, r#"\.emit\(\s*['"`](?P<key>[^'"`]+)['"`]"#),
        emit(
            "dispatch_custom_event",
            Event,
            r#"\bnew\s+(?:Custom)?Event\(\s*['"`](?P<key>[^'"`]+)['"`]"#,
        ),
        emit(
            "django_signal_send",
            Event,
            r#"\b(?P<key>[A-Za-z_][\w.]*)\.send(?:_robust)?\(\s*sender\s*="#,
        ),
        emit(
            "spring_publish_event",
            Event,
            r#"\bpublishEvent\(\s*new\s+(?P<key>\w+)\("#,
        ),
        receive(
            "spring_event_listener",
            Event,
            r#"@EventListener\(\s*(?:classes\s*=\s*)?\{?\s*(?P<key>\w+)\.class"#,
        )
        .decorated(),
        // -- pubsub ---------------------------------------------------------
        receive(
            "subscribe_channel",
            PubSub,
            r#"\.p?subscribe\(\s*['"`](?P<key>[^'"`]+)['"`]\s*(?:,\s*(?P<handler>[A-Za-z_$][\w$.]*)\s*\))?"#,
        ),
        emit("publish_channel", PubSub, r#"\.publish\(\s*['"`](?P<key>[^'"`]+)['"`]"#),
        // -- dependency injection -------------------------------------------
        receive(
            "inversify_bind",
            DependencyInjection,
            r#"\.bind(?:<[^>]*>)?\(\s*['"`]?(?P<key>[\w.]+)['"`]?\s*\)\s*\.to\w*\(\s*(?P<handler>[A-Za-z_$][\w$]*)"#,
        ),
        receive(
            "container_register",
            DependencyInjection,
            r#"\b\w*(?:container|injector|registry)\.register\w*\(\s*['"`](?P<key>[\w.]+)['"`]\s*,\s*(?P<handler>[A-Za-z_$][\w$]*)"#,
        ),
        receive(
            "aspnet_add_service",
            DependencyInjection,
            r#"\.Add(?:Scoped|Singleton|Transient)<\s*(?P<key>\w+)\s*,\s*(?P<handler>\w+)\s*>"#,
        ),
        receive(
            "nest_provider",
            DependencyInjection,
            r#"provide\s*:\s*['"`]?(?P<key>[\w.]+)['"`]?\s*,\s*use(?:Class|Value|Factory|Existing)\s*:\s*(?P<handler>[A-Za-z_$][\w$]*)"#,
        ),
        emit(
            "container_resolve",
            DependencyInjection,
            r#"\b\w*(?:container|injector|provider)\.(?:resolve|get)\s*(?:<[^>]*>)?\(\s*['"`]?(?P<key>[\w.]+)['"`]?\s*\)"#,
        ),
        emit("inject_decorator", DependencyInjection, r#"@Inject\(\s*['"`]?(?P<key>[\w.]+)['"`]?\s*\)"#),
        emit(
            "aspnet_get_service",
            DependencyInjection,
            r#"\.Get(?:Required)?Service<\s*(?P<key>\w+)\s*>"#,
        ),
        // -- convention routing ---------------------------------------------
        emit(
            "rails_controller_action",
            ConventionRouting,
            r#"['"](?P<key>[a-z_/]+#[a-z_]+)['"]"#,
        ),
        emit(
            "laravel_controller_action",
            ConventionRouting,
            r#"\[\s*(?P<ctrl>\w+)Controller::class\s*,\s*['"](?P<action>\w+)['"]\s*\]"#,
        ),
        emit(
            "controller_at_action",
            ConventionRouting,
            r#"['"](?P<ctrl>\w+)Controller@(?P<action>\w+)['"]"#,
        ),
        // -- dispatch table -------------------------------------------------
        emit(
            "redux_dispatch",
            DispatchTable,
            r#"\bdispatch\(\s*\{\s*type\s*:\s*['"`](?P<key>[^'"`]+)['"`]"#,
        ),
        emit(
            "store_dispatch_commit",
            DispatchTable,
            r#"\.(?:dispatch|commit)\(\s*['"`](?P<key>[^'"`]+)['"`]"#,
        ),
        emit(
            "command_bus_execute",
            DispatchTable,
            r#"\b\w*(?:bus|dispatcher|handlers)\.(?:execute|handle|dispatch|call)\(\s*['"`](?P<key>[^'"`]+)['"`]"#,
        ),
        receive(
            "switch_case_key",
            DispatchTable,
            r#"^\s*case\s+['"`](?P<key>[^'"`]+)['"`]\s*:"#,
        ),
        receive(
            "handler_map_entry",
            DispatchTable,
            r#"^\s*['"`](?P<key>[\w/.:-]+)['"`]\s*:\s*(?P<handler>[A-Za-z_$][\w$.]*)\s*,?\s*$"#,
        )
        .needs_handler(),
        // -- file watcher ---------------------------------------------------
        receive(
            "fs_watch",
            FileWatcher,
            r#"\b(?:chokidar|fs|watcher)\.watch(?:File)?\(\s*['"`](?P<key>[^'"`]+)['"`]\s*(?:,\s*(?P<handler>[A-Za-z_$][\w$.]*)\s*\))?"#,
        ),
        receive(
            "watchdog_schedule",
            FileWatcher,
            r#"\.schedule\(\s*(?P<handler>\w+)\s*(?:\([^)]*\))?\s*,\s*(?:path\s*=\s*)?['"](?P<key>[^'"]+)['"]"#,
        ),
        receive(
            "notify_watch",
            FileWatcher,
            r#"\.watch\(\s*(?:Path::new\()?\s*"(?P<key>[^"]+)""#,
        ),
        emit(
            "node_write_file",
            FileWatcher,
            r#"\b(?:fs\.)?(?:writeFile|writeFileSync|appendFile|appendFileSync|createWriteStream)\(\s*['"`](?P<key>[^'"`]+)['"`]"#,
        ),
        emit(
            "python_open_write",
            FileWatcher,
            r#"\bopen\(\s*f?['"](?P<key>[^'"]+)['"]\s*,\s*['"][wax]"#,
        ),
        emit("rust_fs_write", FileWatcher, r#"\bfs::write\(\s*"(?P<key>[^"]+)""#),
        // -- shared store ---------------------------------------------------
        emit(
            "web_storage_set",
            SharedStore,
            r#"\b(?:localStorage|sessionStorage)\.setItem\(\s*['"`](?P<key>[^'"`]+)['"`]"#,
        ),
        receive(
            "web_storage_get",
            SharedStore,
            r#"\b(?:localStorage|sessionStorage)\.getItem\(\s*['"`](?P<key>[^'"`]+)['"`]"#,
        ),
        emit(
            "kv_store_write",
            SharedStore,
            r#"\b\w*(?:redis|cache|kv|store)\w*\.(?:set|setex|hset|lpush|rpush|sadd|put)\(\s*['"`](?P<key>[^'"`/][^'"`]*)['"`]"#,
        ),
        receive(
            "kv_store_read",
            SharedStore,
            r#"\b\w*(?:redis|cache|kv|store)\w*\.(?:get|hget|hgetall|lpop|rpop|blpop|brpop|smembers|lrange)\(\s*['"`](?P<key>[^'"`/][^'"`]*)['"`]"#,
        ),
    ]
}

fn entry_defs() -> Vec<(&'static str, TriggerKind, Anchor, &'static str)> {
    vec![
        (
            "node_cron",
            TriggerKind::ScheduledJob,
            Anchor::Enclosing,
            r#"\bcron\.schedule\(\s*['"`](?P<key>[^'"`]+)['"`]"#,
        ),
        (
            "scheduled_annotation",
            TriggerKind::ScheduledJob,
            Anchor::Decorated,
            r#"@(?:Scheduled|Cron|Interval)\b"#,
        ),
        (
            "python_periodic",
            TriggerKind::ScheduledJob,
            Anchor::Decorated,
            r#"@(?:\w+\.)?(?:periodic_task|scheduled_job|scheduled)\b"#,
        ),
        (
            "python_schedule_every",
            TriggerKind::ScheduledJob,
            Anchor::Enclosing,
            r#"\bschedule\.every\("#,
        ),
        (
            "commander_command",
            TriggerKind::CliCommand,
            Anchor::Enclosing,
            r#"\.command\(\s*['"`](?P<key>[\w:-]+)"#,
        ),
        (
            "click_command",
            TriggerKind::CliCommand,
            Anchor::Decorated,
            r#"^\s*@(?:\w+\.)?(?:command|group)\("#,
        ),
        (
            "argparse_subparser",
            TriggerKind::CliCommand,
            Anchor::Enclosing,
            r#"\.add_parser\(\s*['"](?P<key>[\w:-]+)['"]"#,
        ),
        (
            "python_main_guard",
            TriggerKind::CliCommand,
            Anchor::Enclosing,
            r#"^if\s+__name__\s*==\s*['"]__main__['"]\s*:"#,
        ),
        (
            "dom_ui_event",
            TriggerKind::UiHandler,
            Anchor::Enclosing,
            r#"\.addEventListener\(\s*['"`](?P<key>click|dblclick|submit|change|input|keydown|keyup|keypress)['"`]"#,
        ),
        (
            "jsx_ui_handler",
            TriggerKind::UiHandler,
            Anchor::Enclosing,
            r#"\bon(?:Click|Submit|Change|Press|KeyDown)=\{\s*(?P<handler>[A-Za-z_$][\w$.]*)\s*\}"#,
        ),
    ]
}

fn effect_defs() -> Vec<(&'static str, EffectKind, &'static str)> {
    vec![
        (
            "orm_write",
            EffectKind::DbWrite,
            r#"\b(?:db|repo|repository|session|collection|knex|em|entityManager|prisma\.\w+|\w+Repository|\w+Repo|\w+Model|objects)\.(?:save|insert\w*|update\w*|delete\w*|upsert|create|destroy|bulkCreate|bulk_create|commit|add|remove|persist|flush|SaveChanges\w*)\("#,
        ),
        (
            "sql_write",
            EffectKind::DbWrite,
            r#"(?i)['"`]\s*(?:INSERT\s+INTO|UPDATE\s+\w+\s+SET|DELETE\s+FROM)\b"#,
        ),
        (
            "express_response",
            EffectKind::Response,
            r#"\bres\.(?:send|json|render|redirect|end|sendFile|sendStatus)\("#,
        ),
        (
            "framework_response",
            EffectKind::Response,
            r#"\breturn\s+(?:Response|JsonResponse|HttpResponse|HttpResponseRedirect|jsonify|render_template|render|redirect|Ok|Created|NoContent|BadRequest|NotFound|ResponseEntity\.\w+|NextResponse\.\w+)\("#,
        ),
        (
            "go_response",
            EffectKind::Response,
            r#"\b(?:w\.Write(?:Header)?\(|http\.Error\(|json\.NewEncoder\(w\)|c\.(?:JSON|String|HTML|XML)\()"#,
        ),
        (
            "process_exit",
            EffectKind::Response,
            r#"\b(?:process\.exit|sys\.exit|os\.Exit|std::process::exit|process\.stdout\.write|sys\.stdout\.write)\("#,
        ),
        (
            "send_mail",
            EffectKind::Email,
            r#"\b(?:sendMail|sendEmail|send_mail|send_email|send_mass_mail|EmailMessage|SmtpClient|smtplib\.SMTP|sgMail\.send|mailer\.send\w*|mail\.send)\b"#,
        ),
        (
            "absolute_http_call",
            EffectKind::ExternalCall,
            r#"\b(?:fetch|axios\.\w+|requests\.\w+|httpx\.\w+|http\.(?:Get|Post)|reqwest::get|client\.(?:get|post))\(\s*f?['"`]https?://"#,
        ),
        (
            "http_client_async",
            EffectKind::ExternalCall,
            r#"\b\w*[Hh]ttp[Cc]lient\w*\.(?:GetAsync|PostAsync|PutAsync|DeleteAsync|SendAsync)\("#,
        ),
        (
            "file_write",
            EffectKind::FileWrite,
            r#"\b(?:writeFile|writeFileSync|appendFile|appendFileSync|createWriteStream|fs::write|File::create|os\.WriteFile|os\.Create|write_text|write_bytes)\("#,
        ),
        (
            "open_for_write",
            EffectKind::FileWrite,
            r#"\b(?:open|fopen)\([^)]*['"][wa][bt+]?['"]"#,
        ),
        (
            "broker_publish",
            EffectKind::Publish,
            r#"\b(?:\w+\.sendToQueue|\w+\.basic_publish|producer\.send|sns\.publish|\w+\.produce)\("#,
        ),
    ]
}

// ---------------------------------------------------------------------------
// Compiled catalog
// ---------------------------------------------------------------------------

fn compile(name: &str, pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(idiom = name, error = %e, "skipping idiom with invalid pattern");
            None
        }
    }
}

static CONNECTIONS: OnceLock<Vec<ConnectionIdiom>> = OnceLock::new();
static ENTRIES: OnceLock<Vec<EntryIdiom>> = OnceLock::new();
static EFFECTS: OnceLock<Vec<EffectIdiom>> = OnceLock::new();

/// Connection idioms in match-priority order.
pub fn connection_idioms() -> &'static [ConnectionIdiom] {
    CONNECTIONS.get_or_init(|| {
        connection_defs()
            .into_iter()
            .filter_map(|s| {
                compile(s.name, s.pattern).map(|regex| ConnectionIdiom {
                    name: s.name,
                    kind: s.kind,
                    side: s.side,
                    regex,
                    anchor: s.anchor,
                    trigger: s.trigger,
                    requires_handler: s.requires_handler,
                    key_from_symbol: s.key_from_symbol,
                })
            })
            .collect()
    })
}

pub fn entry_idioms() -> &'static [EntryIdiom] {
    ENTRIES.get_or_init(|| {
        entry_defs()
            .into_iter()
            .filter_map(|(name, trigger, anchor, pattern)| {
                compile(name, pattern).map(|regex| EntryIdiom {
                    name,
                    trigger,
                    regex,
                    anchor,
                })
            })
            .collect()
    })
}

pub fn effect_idioms() -> &'static [EffectIdiom] {
    EFFECTS.get_or_init(|| {
        effect_defs()
            .into_iter()
            .filter_map(|(name, effect, pattern)| {
                compile(name, pattern).map(|regex| EffectIdiom { name, effect, regex })
            })
            .collect()
    })
}

// ---------------------------------------------------------------------------
// Key normalisation
// ---------------------------------------------------------------------------

static TEMPLATE_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn template_re() -> Option<&'static Regex> {
    TEMPLATE_RE
        .get_or_init(|| compile("template_placeholder", r"\$\{[^}]*\}"))
        .as_ref()
}

/// Normalise a raw key so both halves of a connection compare equal.
///
/// Quotes and whitespace are stripped everywhere. Route-like kinds also
/// replace parameter segments (`:id`, `{id}`, `<int:id>`, `[id]`,
/// `${id}`, numbers) with `*`, drop query strings, and trim trailing
/// slashes.
pub fn normalize_key(kind: EdgeKind, raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim();
    match kind {
        EdgeKind::Http | EdgeKind::Webhook => normalize_route(trimmed),
        EdgeKind::FileWatcher => trimmed.trim_start_matches("./").trim_end_matches('/').to_string(),
        _ => trimmed.to_string(),
    }
}

fn normalize_route(route: &str) -> String {
    let templated = match template_re() {
        Some(re) => re.replace_all(route, "*").into_owned(),
        None => route.to_string(),
    };
    let path = templated
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_start_matches('^')
        .trim_end_matches('$');

    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|seg| {
            let is_param = seg.starts_with(':')
                || (seg.starts_with('{') && seg.ends_with('}'))
                || (seg.starts_with('<') && seg.ends_with('>'))
                || (seg.starts_with('[') && seg.ends_with(']'))
                || seg.chars().all(|c| c.is_ascii_digit());
            if is_param {
                "*".to_string()
            } else {
                seg.to_string()
            }
        })
        .collect();
    format!("/{}", segments.join("/"))
}

/// Route key for a controller class and action: `OrdersController.create`
/// and `'orders#create'` both become `orders#create`.
pub fn controller_action_key(controller: &str, action: &str) -> String {
    let base = controller.strip_suffix("Controller").unwrap_or(controller);
    format!("{}#{}", snake_case(base), snake_case(action))
}

pub fn snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
