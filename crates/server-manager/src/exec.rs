//! 명령 실행 -- 컨테이너 내부 argv 실행 및 콘솔 명령 토크나이저
//!
//! [`CommandExecutor`]는 셸을 거치지 않고 argv 배열만 실행합니다.
//! 콘솔 한 줄은 [`tokenize`]로 인자 배열로 변환한 뒤 이미지의
//! `send-command` 헬퍼에 전달됩니다.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cubehost_core::metrics as m;

use crate::docker::{DockerClient, ExecOutput};
use crate::error::ManagerError;

/// 서버 콘솔로 명령을 전달하는 이미지 내부 헬퍼
pub const CONSOLE_HELPER: &str = "send-command";

/// 플레이어 이름 최대 길이
const MAX_PLAYER_NAME_LEN: usize = 32;

/// 콘솔 한 줄을 argv 배열로 분리합니다.
///
/// 공백으로 인자를 나누며 작은따옴표, 큰따옴표, 백슬래시 이스케이프를 따릅니다.
/// 작은따옴표 안에서는 모든 문자가 그대로 유지됩니다.
///
/// # Errors
///
/// 닫히지 않은 따옴표나 줄 끝의 백슬래시는 `ManagerError::Validation`입니다.
///
/// # Examples
///
/// ```
/// use cubehost_manager::exec::tokenize;
///
/// let argv = tokenize(r#"ban "Player One""#).unwrap();
/// assert_eq!(argv, vec!["ban", "Player One"]);
/// ```
pub fn tokenize(line: &str) -> Result<Vec<String>, ManagerError> {
    #[derive(PartialEq)]
    enum Quote {
        None,
        Single,
        Double,
    }

    let invalid = |reason: &str| ManagerError::Validation {
        field: "command".to_owned(),
        reason: reason.to_owned(),
    };

    let mut tokens = Vec::new();
    let mut current = String::new();
    // 빈 따옴표 인자("")도 토큰으로 남기기 위한 표시
    let mut in_token = false;
    let mut quote = Quote::None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match quote {
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                } else {
                    current.push(c);
                }
            }
            Quote::Double => match c {
                '"' => quote = Quote::None,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '\\')) => current.push(next),
                    Some(next) => {
                        current.push('\\');
                        current.push(next);
                    }
                    None => return Err(invalid("unterminated double quote")),
                },
                _ => current.push(c),
            },
            Quote::None => match c {
                '\'' => {
                    quote = Quote::Single;
                    in_token = true;
                }
                '"' => {
                    quote = Quote::Double;
                    in_token = true;
                }
                '\\' => {
                    let next = chars
                        .next()
                        .ok_or_else(|| invalid("trailing backslash"))?;
                    current.push(next);
                    in_token = true;
                }
                c if c.is_whitespace() => {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                _ => {
                    current.push(c);
                    in_token = true;
                }
            },
        }
    }

    match quote {
        Quote::Single => Err(invalid("unterminated single quote")),
        Quote::Double => Err(invalid("unterminated double quote")),
        Quote::None => {
            if in_token {
                tokens.push(current);
            }
            Ok(tokens)
        }
    }
}

/// 플레이어 관리 액션
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlayerAction {
    /// 서버에서 내보내기
    Kick {
        /// 대상 플레이어
        player: String,
        /// 사유 (선택)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// 운영자 권한 부여
    Op {
        /// 대상 플레이어
        player: String,
    },
    /// 운영자 권한 회수
    Deop {
        /// 대상 플레이어
        player: String,
    },
    /// 허용 목록에 추가
    AllowlistAdd {
        /// 대상 플레이어
        player: String,
    },
    /// 허용 목록에서 제거
    AllowlistRemove {
        /// 대상 플레이어
        player: String,
    },
}

impl PlayerAction {
    /// 메트릭/로그용 고정 액션 이름
    pub fn action_name(&self) -> &'static str {
        match self {
            Self::Kick { .. } => "kick",
            Self::Op { .. } => "op",
            Self::Deop { .. } => "deop",
            Self::AllowlistAdd { .. } => "allowlist_add",
            Self::AllowlistRemove { .. } => "allowlist_remove",
        }
    }

    /// 대상 플레이어 이름
    pub fn player(&self) -> &str {
        match self {
            Self::Kick { player, .. }
            | Self::Op { player }
            | Self::Deop { player }
            | Self::AllowlistAdd { player }
            | Self::AllowlistRemove { player } => player,
        }
    }

    /// 콘솔 명령 인자 배열 (헬퍼 이름 제외)
    ///
    /// 공백이 들어간 플레이어 이름은 콘솔이 한 인자로 읽도록 따옴표로 감쌉니다.
    pub fn to_console_args(&self) -> Result<Vec<String>, ManagerError> {
        let player = console_player(self.player())?;
        let args = match self {
            Self::Kick { reason, .. } => {
                let mut args = vec!["kick".to_owned(), player];
                if let Some(reason) = reason.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
                    args.push(reason.to_owned());
                }
                args
            }
            Self::Op { .. } => vec!["op".to_owned(), player],
            Self::Deop { .. } => vec!["deop".to_owned(), player],
            Self::AllowlistAdd { .. } => vec!["allowlist".to_owned(), "add".to_owned(), player],
            Self::AllowlistRemove { .. } => {
                vec!["allowlist".to_owned(), "remove".to_owned(), player]
            }
        };
        Ok(args)
    }
}

impl fmt::Display for PlayerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.action_name(), self.player())
    }
}

fn console_player(player: &str) -> Result<String, ManagerError> {
    let player = player.trim();
    let invalid = |reason: &str| ManagerError::Validation {
        field: "player".to_owned(),
        reason: reason.to_owned(),
    };
    if player.is_empty() {
        return Err(invalid("player name must not be empty"));
    }
    if player.chars().count() > MAX_PLAYER_NAME_LEN {
        return Err(invalid("player name is too long"));
    }
    if player.chars().any(|c| c.is_control() || c == '"' || c == '\\') {
        return Err(invalid("player name contains disallowed characters"));
    }
    if player.contains(' ') {
        Ok(format!("\"{player}\""))
    } else {
        Ok(player.to_owned())
    }
}

/// 컨테이너 명령 실행기
///
/// 실행 전에 컨테이너가 실행 중인지 확인하고, 0이 아닌 종료 코드는
/// `ManagerError::Execution`으로 변환합니다.
pub struct CommandExecutor<D: DockerClient> {
    docker: Arc<D>,
    timeout: Duration,
}

impl<D: DockerClient> Clone for CommandExecutor<D> {
    fn clone(&self) -> Self {
        Self {
            docker: Arc::clone(&self.docker),
            timeout: self.timeout,
        }
    }
}

impl<D: DockerClient> CommandExecutor<D> {
    /// 새 실행기를 생성합니다.
    pub fn new(docker: Arc<D>, timeout: Duration) -> Self {
        Self { docker, timeout }
    }

    /// 서버 컨테이너에서 argv를 실행합니다.
    ///
    /// # Errors
    ///
    /// - `ManagerError::Validation`: argv가 비어 있음
    /// - `ManagerError::Execution`: 컨테이너가 없거나 실행 중이 아님, 런타임이 거부함,
    ///   명령이 0이 아닌 코드로 종료됨
    /// - `ManagerError::Timeout`: 실행이 제한 시간을 넘김
    pub async fn exec(&self, server_id: &str, argv: &[String]) -> Result<ExecOutput, ManagerError> {
        if argv.is_empty() || argv[0].is_empty() {
            return Err(ManagerError::Validation {
                field: "argv".to_owned(),
                reason: "command must not be empty".to_owned(),
            });
        }

        let result = self.exec_inner(server_id, argv).await;
        let outcome = if result.is_ok() { "success" } else { "failure" };
        metrics::counter!(m::EXEC_TOTAL, m::LABEL_RESULT => outcome).increment(1);

        match &result {
            Ok(output) => debug!(
                server_id = server_id,
                program = argv[0].as_str(),
                exit_code = ?output.exit_code,
                "command executed"
            ),
            Err(e) => warn!(
                server_id = server_id,
                program = argv[0].as_str(),
                error = %e,
                "command execution failed"
            ),
        }
        result
    }

    async fn exec_inner(&self, server_id: &str, argv: &[String]) -> Result<ExecOutput, ManagerError> {
        let execution = |reason: String| ManagerError::Execution {
            server_id: server_id.to_owned(),
            reason,
        };

        let info = match self.with_timeout("inspect", server_id, self.docker.inspect_container(server_id)).await {
            Ok(info) => info,
            Err(ManagerError::ContainerNotFound(_)) => {
                return Err(execution("container does not exist".to_owned()));
            }
            Err(e) => return Err(e),
        };
        if !info.state.is_running() {
            return Err(execution(format!("server is not running (state: {})", info.state)));
        }

        let output = match self.with_timeout("exec", server_id, self.docker.exec(server_id, argv)).await {
            Ok(output) => output,
            Err(e @ ManagerError::Timeout { .. }) => return Err(e),
            Err(e) => return Err(execution(e.to_string())),
        };

        if !output.success() {
            let code = output
                .exit_code
                .map_or_else(|| "unknown".to_owned(), |c| c.to_string());
            let detail = output.output.trim();
            let reason = if detail.is_empty() {
                format!("command exited with code {code}")
            } else {
                format!("command exited with code {code}: {detail}")
            };
            return Err(execution(reason));
        }
        Ok(output)
    }

    /// 콘솔 한 줄을 서버 콘솔로 전달합니다.
    pub async fn console(&self, server_id: &str, line: &str) -> Result<ExecOutput, ManagerError> {
        let tokens = tokenize(line)?;
        if tokens.is_empty() {
            return Err(ManagerError::Validation {
                field: "command".to_owned(),
                reason: "console command must not be empty".to_owned(),
            });
        }
        let mut argv = Vec::with_capacity(tokens.len() + 1);
        argv.push(CONSOLE_HELPER.to_owned());
        argv.extend(tokens);
        self.exec(server_id, &argv).await
    }

    /// 플레이어 관리 액션을 실행합니다.
    pub async fn player(&self, server_id: &str, action: &PlayerAction) -> Result<ExecOutput, ManagerError> {
        let mut argv = vec![CONSOLE_HELPER.to_owned()];
        argv.extend(action.to_console_args()?);
        info!(server_id = server_id, action = %action, "running player action");
        self.exec(server_id, &argv).await
    }

    async fn with_timeout<T>(
        &self,
        operation: &str,
        server_id: &str,
        fut: impl Future<Output = Result<T, ManagerError>>,
    ) -> Result<T, ManagerError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_elapsed| ManagerError::Timeout {
                operation: operation.to_owned(),
                target: server_id.to_owned(),
                timeout_secs: self.timeout.as_secs(),
            })?
    }
}
