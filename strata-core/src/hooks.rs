//! Shell-integration snippets.
//!
//! Sourcing one of these in the shell makes it emit the markers the block
//! segmenter keys on:
//!
//! | marker           | when                          |
//! |------------------|-------------------------------|
//! | `OSC 133;A`      | prompt is about to be drawn   |
//! | `OSC 133;B`      | prompt done, input begins     |
//! | `OSC 133;C`      | command accepted, output next |
//! | `OSC 133;D;<rc>` | command finished              |
//! | `OSC 7`          | working directory, per prompt |

/// For `~/.bashrc` (or written to the shell on startup).
pub const BASH_HOOK: &str = r#"__strata_prompt() {
  local rc=$?
  if [ -n "$__strata_running" ]; then
    printf '\033]133;D;%s\007' "$rc"
  fi
  __strata_running=
  printf '\033]7;file://%s%s\007' "$HOSTNAME" "$PWD"
  printf '\033]133;A\007'
  return $rc
}
__strata_preexec() {
  [ -n "$COMP_LINE" ] && return
  [ -n "$__strata_running" ] && return
  [ "$BASH_COMMAND" = "__strata_prompt" ] && return
  __strata_running=1
  printf '\033]133;C\007'
}
PROMPT_COMMAND="__strata_prompt${PROMPT_COMMAND:+;$PROMPT_COMMAND}"
PS1="$PS1"'\[\033]133;B\007\]'
trap '__strata_preexec' DEBUG
"#;

/// For `~/.zshrc`.
pub const ZSH_HOOK: &str = r#"__strata_precmd() {
  local rc=$?
  if [[ -n $__strata_running ]]; then
    printf '\033]133;D;%s\007' $rc
  fi
  __strata_running=
  printf '\033]7;file://%s%s\007' $HOST $PWD
  printf '\033]133;A\007'
}
__strata_preexec() {
  __strata_running=1
  printf '\033]133;C\007'
}
autoload -Uz add-zsh-hook
add-zsh-hook precmd __strata_precmd
add-zsh-hook preexec __strata_preexec
PS1="$PS1%{"$'\033]133;B\007'"%}"
"#;

/// Hook for the shell at `shell_path`, judged by its file name.
pub fn hook_for_shell(shell_path: &str) -> Option<&'static str> {
    let name = shell_path.rsplit('/').next().unwrap_or(shell_path);
    match name.trim_start_matches('-') {
        "bash" => Some(BASH_HOOK),
        "zsh" => Some(ZSH_HOOK),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hooks_emit_all_markers() {
        for hook in [BASH_HOOK, ZSH_HOOK] {
            for marker in ["133;A", "133;B", "133;C", "133;D;", "]7;file://"] {
                assert!(hook.contains(marker), "missing {marker}");
            }
        }
    }

    #[test]
    fn test_hook_lookup() {
        assert_eq!(hook_for_shell("/usr/bin/bash"), Some(BASH_HOOK));
        assert_eq!(hook_for_shell("-zsh"), Some(ZSH_HOOK));
        assert_eq!(hook_for_shell("/bin/sh"), None);
    }
}
