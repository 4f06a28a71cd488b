//! CLI (Command Line Interface) mode
//!
//! Provides an interactive REPL, plus the headless mode every sub-agent
//! runs in: one prompt in, the answer on stdout, exit.

use std::borrow::Cow;
use std::sync::Arc;

use cc_core::agents::{CommandSpawner, ExecutorConfig, SUBAGENT_ENV};
use cc_core::tool::{
    handler_for_mode, ApprovalHandler, ApprovalSet, AutoApprove, DenyAll, ToolScheduler,
};
use cc_core::{
    ApprovalMode, ClaudeBackend, ClaudeClient, Config, Conversation, StreamCoordinator,
    ToolManager, TurnObserver, TurnOutcome,
};
use cc_tools::{register_agent_tools, register_default_tools};
use nu_ansi_term::{Color, Style};
use reedline::{
    ColumnarMenu, Completer, DefaultHinter, Emacs, KeyCode, KeyModifiers, Keybindings,
    MenuBuilder, Prompt, PromptEditMode, PromptHistorySearch, Reedline, ReedlineEvent,
    ReedlineMenu, Signal, Span, Suggestion,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::console::{ConsoleObserver, HeadlessObserver, StdinApprover};

/// システムプロンプト
const SYSTEM_PROMPT: &str = "あなたはツールにアクセスできる便利な AI アシスタントです。\
    ユーザーと同じ言語で応答してください。\
    大きな作業は delegate_task や spawn_sub_agent でサブエージェントに分担できます。";

/// サブエージェント用システムプロンプト
const SUBAGENT_PROMPT: &str = "あなたは親エージェントから 1 つのタスクを任されたサブエージェントです。\
    そのタスクだけを完了し、結果を簡潔に報告してください。";

/// Exit status for a cancelled headless run (128 + SIGINT)
const EXIT_CANCELLED: i32 = 130;

/// Available commands for autocomplete display
const COMMANDS: &[(&str, &str)] = &[
    ("/help", "ヘルプを表示"),
    ("/exit", "プログラムを終了"),
    ("/quit", "プログラムを終了"),
    ("/clear", "会話履歴をクリア"),
    ("/history", "会話履歴を表示"),
    ("/approvals", "常に許可したツールを表示"),
];

/// What the session is wired to
pub struct SessionOptions {
    pub observer: Arc<dyn TurnObserver>,
    pub approver: Arc<dyn ApprovalHandler>,
    /// Register delegate_task / spawn_sub_agent
    pub agent_tools: bool,
    pub system_prompt: String,
}

/// One conversation driven by the stream coordinator
pub struct AgentSession {
    coordinator: StreamCoordinator,
    conversation: Conversation,
    system_prompt: String,
}

impl AgentSession {
    pub fn new(config: &Config, options: SessionOptions) -> anyhow::Result<Self> {
        let mut tools = ToolManager::new();
        register_default_tools(&mut tools);
        if options.agent_tools {
            let spawner = CommandSpawner::from_config(config.agents.agent_command.as_deref())
                .map_err(|e| anyhow::anyhow!("Sub-agent command error: {}", e))?;
            info!("Sub-agents run as {}", spawner.program().display());
            register_agent_tools(
                &mut tools,
                Arc::new(spawner),
                ExecutorConfig::from_agents(&config.agents),
            );
        }
        info!(
            "Registered {} tools: {:?}",
            tools.len(),
            tools.tool_names()
        );

        let client = ClaudeClient::new(config)
            .map_err(|e| anyhow::anyhow!("Failed to create LLM client: {}", e))?;
        info!("Model: {}", client.model());
        let backend = Arc::new(ClaudeBackend::new(client, tools.definitions()));

        let scheduler = ToolScheduler::new(Arc::new(tools), options.approver, options.observer.clone())
            .with_approvals(ApprovalSet::with_roots(
                config.approval.auto_approved.iter().cloned(),
            ));
        let coordinator = StreamCoordinator::new(
            backend,
            scheduler,
            options.observer,
            config.stream.clone(),
        );

        Ok(Self {
            coordinator,
            conversation: Conversation::with_system(options.system_prompt.clone()),
            system_prompt: options.system_prompt,
        })
    }

    /// Send one user message and run until the model is done
    pub async fn send(&mut self, prompt: &str, cancel: &CancellationToken) -> TurnOutcome {
        self.conversation.push_user(prompt);
        self.coordinator.run(&mut self.conversation, cancel).await
    }

    pub fn clear(&mut self) {
        self.conversation = Conversation::with_system(self.system_prompt.clone());
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn approved_roots(&self) -> Vec<String> {
        self.coordinator
            .scheduler()
            .approvals()
            .iter()
            .map(str::to_string)
            .collect()
    }
}

/// Cancel `cancel` on Ctrl+C or SIGTERM
pub fn watch_interrupts(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut terminate) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = terminate.recv() => {}
                    }
                }
                Err(e) => {
                    warn!("SIGTERM handler unavailable: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("Interrupt received, cancelling");
        cancel.cancel();
    })
}

fn is_subagent() -> bool {
    std::env::var(SUBAGENT_ENV).is_ok_and(|v| v == "1")
}

pub fn exit_code(outcome: &TurnOutcome) -> i32 {
    match outcome {
        TurnOutcome::Completed => 0,
        TurnOutcome::UserCancelled => EXIT_CANCELLED,
        TurnOutcome::Error(_) => 1,
    }
}

// ============================================================================
// 非対話モード (Headless mode)
// ============================================================================

/// 非対話モード: プロンプトを直接実行して終了コードを返す
///
/// Nothing is asked on the terminal: calls needing approval are approved
/// unless the approval mode is `deny`.
pub async fn run_prompt(config: Config, prompt: &str) -> anyhow::Result<i32> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        anyhow::bail!("Prompt is empty");
    }

    let subagent = is_subagent();
    let approver: Arc<dyn ApprovalHandler> = match config.approval.mode {
        ApprovalMode::Deny => Arc::new(DenyAll),
        ApprovalMode::Prompt | ApprovalMode::Auto => Arc::new(AutoApprove),
    };
    let mut session = AgentSession::new(
        &config,
        SessionOptions {
            observer: Arc::new(HeadlessObserver),
            approver,
            agent_tools: !subagent,
            system_prompt: if subagent { SUBAGENT_PROMPT } else { SYSTEM_PROMPT }.to_string(),
        },
    )?;
    info!("Running headless (sub-agent: {})", subagent);

    let cancel = CancellationToken::new();
    let interrupts = watch_interrupts(cancel.clone());
    let outcome = session.send(prompt, &cancel).await;
    interrupts.abort();
    println!();

    if let TurnOutcome::Error(e) = &outcome {
        error!("Run failed: {}", e);
    }
    Ok(exit_code(&outcome))
}

// ============================================================================
// 対話モード (Interactive mode)
// ============================================================================

/// Command completer for reedline
#[derive(Clone)]
pub struct CommandCompleter {
    commands: Vec<(&'static str, &'static str)>,
}

impl CommandCompleter {
    pub fn new() -> Self {
        Self {
            commands: COMMANDS.to_vec(),
        }
    }
}

impl Default for CommandCompleter {
    fn default() -> Self {
        Self::new()
    }
}

impl Completer for CommandCompleter {
    fn complete(&mut self, line: &str, pos: usize) -> Vec<Suggestion> {
        if !line.starts_with('/') {
            return Vec::new();
        }

        self.commands
            .iter()
            .filter(|(cmd, _)| cmd.starts_with(line))
            .map(|(cmd, desc)| Suggestion {
                value: cmd.to_string(),
                description: Some(desc.to_string()),
                extra: None,
                span: Span::new(0, pos),
                append_whitespace: true,
                style: None,
            })
            .collect()
    }
}

struct ColoredPrompt {
    style: Style,
}

impl ColoredPrompt {
    fn new() -> Self {
        Self {
            style: Color::Cyan.bold(),
        }
    }
}

impl Prompt for ColoredPrompt {
    fn render_prompt_left(&self) -> Cow<'_, str> {
        Cow::Owned(self.style.paint("> ").to_string())
    }

    fn render_prompt_right(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _prompt_mode: PromptEditMode) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_history_search_indicator(
        &self,
        _history_search: PromptHistorySearch,
    ) -> Cow<'_, str> {
        Cow::Borrowed("")
    }
}

/// Slash commands understood by the REPL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplCommand {
    Exit,
    Clear,
    Help,
    History,
    Approvals,
    Unknown,
}

fn parse_command(input: &str) -> Option<ReplCommand> {
    let lower = input.to_lowercase();
    match lower.as_str() {
        "/exit" | "/quit" | "/q" => Some(ReplCommand::Exit),
        "/clear" => Some(ReplCommand::Clear),
        "/help" | "/?" => Some(ReplCommand::Help),
        "/history" => Some(ReplCommand::History),
        "/approvals" => Some(ReplCommand::Approvals),
        _ if lower.starts_with('/') => Some(ReplCommand::Unknown),
        _ => None,
    }
}

fn keybindings() -> Keybindings {
    let mut keybindings = Keybindings::new();
    for (code, event) in [
        (KeyCode::Tab, ReedlineEvent::Edit(vec![reedline::EditCommand::Complete])),
        (KeyCode::Char('/'), ReedlineEvent::Edit(vec![reedline::EditCommand::Complete])),
        (KeyCode::Enter, ReedlineEvent::Submit),
        (KeyCode::Esc, ReedlineEvent::Esc),
        (KeyCode::Up, ReedlineEvent::Up),
        (KeyCode::Down, ReedlineEvent::Down),
    ] {
        keybindings.add_binding(KeyModifiers::NONE, code, event);
    }
    keybindings.add_binding(KeyModifiers::CONTROL, KeyCode::Char('c'), ReedlineEvent::CtrlC);
    keybindings.add_binding(KeyModifiers::CONTROL, KeyCode::Char('d'), ReedlineEvent::CtrlD);
    keybindings
}

/// Run CLI interactive mode
pub async fn run_interactive(config: Config) -> anyhow::Result<()> {
    let stdin_approver = Arc::new(StdinApprover::new());
    let approver = handler_for_mode(config.approval.mode, stdin_approver.clone());
    let mut session = AgentSession::new(
        &config,
        SessionOptions {
            observer: Arc::new(ConsoleObserver),
            approver,
            agent_tools: true,
            system_prompt: SYSTEM_PROMPT.to_string(),
        },
    )?;

    print_welcome();

    let menu = Box::new(
        ColumnarMenu::default()
            .with_name("command_menu")
            .with_columns(1)
            .with_column_width(Some(40))
            .with_only_buffer_difference(false),
    );
    let mut line_editor = Reedline::create()
        .with_completer(Box::new(CommandCompleter::new()))
        .with_menu(ReedlineMenu::EngineCompleter(menu))
        .with_hinter(Box::new(
            DefaultHinter::default().with_style(Style::new().dimmed()),
        ))
        .with_edit_mode(Box::new(Emacs::new(keybindings())));
    let prompt = ColoredPrompt::new();

    loop {
        stdin_approver.finish_interrupted().await;
        match line_editor.read_line(&prompt) {
            Ok(Signal::Success(line)) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }

                match parse_command(input) {
                    Some(ReplCommand::Exit) => break,
                    Some(ReplCommand::Clear) => {
                        session.clear();
                        println!("\n✅ 会話履歴をクリアしました。\n");
                        continue;
                    }
                    Some(ReplCommand::Help) => {
                        print_help();
                        continue;
                    }
                    Some(ReplCommand::History) => {
                        print_history(session.conversation());
                        continue;
                    }
                    Some(ReplCommand::Approvals) => {
                        let roots = session.approved_roots();
                        if roots.is_empty() {
                            println!("\n(なし)\n");
                        } else {
                            println!("\n{}\n", roots.join(", "));
                        }
                        continue;
                    }
                    Some(ReplCommand::Unknown) => {
                        eprintln!(
                            "\n❓ 不明なコマンド: {}。/help でコマンド一覧を確認してください。\n",
                            input
                        );
                        continue;
                    }
                    None => {}
                }

                // Ctrl+C during a turn cancels just that turn
                let cancel = CancellationToken::new();
                let interrupts = watch_interrupts(cancel.clone());
                let outcome = session.send(input, &cancel).await;
                interrupts.abort();
                println!("\n");
                info!("Turn ended: {:?}", outcome);
            }
            Ok(Signal::CtrlC) => continue,
            Ok(Signal::CtrlD) => break,
            Err(e) => {
                error!("Line editor error: {}", e);
                break;
            }
        }
    }

    println!("\n👋 さようなら！\n");
    Ok(())
}

fn print_welcome() {
    println!();
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║          🤖 cc-agent - 対話モード                          ║");
    println!("╠════════════════════════════════════════════════════════════╣");
    println!("║  メッセージを入力して Enter でチャット開始                  ║");
    println!("║  Ctrl+C で実行中のターンを中断                              ║");
    println!("║  / を入力するとコマンド候補が表示されます                   ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();
}

fn print_help() {
    println!();
    println!("📖 利用可能なコマンド:");
    for (cmd, desc) in COMMANDS {
        println!("  {} - {}", cmd, desc);
    }
    println!();
}

fn print_history(conversation: &Conversation) {
    println!();
    println!("📜 会話履歴 ({} 件):", conversation.len());
    println!("{}", "─".repeat(50));

    for (i, msg) in conversation.messages.iter().enumerate() {
        let role = match msg.role.as_str() {
            "user" if msg.tool_result_count() > 0 => "🔧 ツール結果",
            "user" => "👤 あなた",
            "assistant" => "🤖 AI",
            other => other,
        };
        let text = msg.text_content();
        let preview = match text.char_indices().nth(100) {
            Some((idx, _)) => format!("{}...", &text[..idx]),
            None => text,
        };
        println!("{}. {}: {}", i + 1, role, preview.replace('\n', " "));
    }

    println!("{}", "─".repeat(50));
    println!();
}
