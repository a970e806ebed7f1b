//! Command executor and trigger dispatcher
//!
//! Commands run synchronously while the writer token is held. Every mutation
//! records the changed path; after the top-level command the dispatcher
//! drains those changes through a FIFO queue, firing matching triggers in
//! registration order. Changes made by a trigger are queued one level deeper
//! than the change that fired it, and nothing fires past the configured
//! cascade depth.

use std::collections::{BTreeMap, VecDeque};

use super::store::WriteGuard;
use super::command::Command;
use super::error::{CacheError, CacheResult};
use super::expr;
use super::interp::{flat_spans, Scope};
use super::path::Path;
use super::value::Value;

impl WriteGuard<'_> {
  /// Run one command with the given wildcard captures. Keys the command
  /// removed lose their expiration before anything else runs.
  pub(super) fn run(&mut self, command: &Command, captures: &[String]) -> CacheResult<Value> {
    let result = self.dispatch(command, captures);
    self.forget_removed();
    result
  }

  fn dispatch(&mut self, command: &Command, captures: &[String]) -> CacheResult<Value> {
    match command {
      Command::Noop => Ok(Value::Null),

      Command::Create { key, value } => {
        let scope = Scope::new(&self.state.tree, captures);
        let path = scope.render_path(key)?;
        let value = scope.render_value(value)?;
        self.edit().create(&path, value.clone())?;
        Ok(value)
      }

      Command::Replace { key, value } => {
        let scope = Scope::new(&self.state.tree, captures);
        let path = scope.render_path(key)?;
        let value = scope.render_value(value)?;
        self.edit().write(&path, value.clone())?;
        Ok(value)
      }

      Command::Delete { key } => {
        let scope = Scope::new(&self.state.tree, captures);
        let paths = key
          .iter()
          .map(|k| scope.render_path(k))
          .collect::<CacheResult<Vec<_>>>()?;
        let mut removed = 0i64;
        for path in &paths {
          removed += self.edit().remove_matching(path).len() as i64;
        }
        Ok(Value::from(removed))
      }

      Command::Inc { key, value } => {
        let path = Scope::new(&self.state.tree, captures).render_path(key)?;
        self.edit().add(&path, *value).map(Value::Number)
      }

      Command::Dec { key, value } => {
        let path = Scope::new(&self.state.tree, captures).render_path(key)?;
        self.edit().add(&path, -*value).map(Value::Number)
      }

      Command::If {
        condition,
        if_true,
        if_false,
      } => {
        let holds = expr::evaluate_condition(condition, &Scope::new(&self.state.tree, captures))?;
        let branch = if holds { if_true } else { if_false };
        match branch {
          Some(command) => self.run(command, captures),
          None => Ok(Value::Null),
        }
      }

      Command::Commands { commands } => {
        let mut last = Value::Null;
        for command in commands {
          self.check_canceled()?;
          last = self.run(command, captures)?;
        }
        Ok(last)
      }

      Command::Print { message } => {
        let message = Scope::new(&self.state.tree, captures).render_text(message)?;
        tracing::info!(target: "mapcache::print", cache = %self.cache.name(), "{}", message);
        Ok(Value::String(message))
      }

      Command::Backup { filename } => {
        let filename = Scope::new(&self.state.tree, captures).render_text(filename)?;
        let path = self
          .cache
          .snapshots()
          .save_blocking(&filename, &self.snapshot())?;
        Ok(Value::String(path.display().to_string()))
      }

      Command::Restore { filename } => {
        let filename = Scope::new(&self.state.tree, captures).render_text(filename)?;
        let snapshot = self.cache.snapshots().load_blocking(&filename)?;
        let installed = self.restore(snapshot)?;
        Ok(Value::from(installed as i64))
      }

      Command::Get { key } => {
        let scope = Scope::new(&self.state.tree, captures);
        let path = scope.render_path(key)?;
        if path.has_wildcard() {
          let mut found = BTreeMap::new();
          for hit in self.state.tree.glob(&path) {
            if let Some(value) = self.state.tree.get(&hit) {
              found.insert(hit.to_string(), value.clone());
            }
          }
          return Ok(Value::Map(found));
        }
        self.state.tree.lookup(&path).cloned()
      }

      Command::Return { key } => Scope::new(&self.state.tree, captures).render_value(key),

      Command::For {
        loop_expr,
        commands,
      } => {
        let pattern = {
          let scope = Scope::new(&self.state.tree, captures);
          loop_pattern(&scope.expand_nested(loop_expr)?)?
        };
        let mut results = Vec::new();
        for target in self.state.tree.glob(&pattern) {
          let bound = pattern.captures(&target).unwrap_or_default();
          for command in commands {
            self.check_canceled()?;
            results.push(self.run(command, &bound)?);
          }
        }
        Ok(Value::List(results))
      }
    }
  }

  /// Fire triggers for every pending change until the queue is empty.
  ///
  /// Trigger errors are logged and the cascade goes on; the first one is
  /// returned at the end. Hitting the depth limit drops the rest of the
  /// queue and returns `CascadeOverflow`, which takes precedence.
  pub(super) fn cascade(&mut self) -> CacheResult<()> {
    let max = self.cache.settings().max_cascade_depth;
    let mut queue: VecDeque<(Path, usize)> = self.changes.drain(..).map(|p| (p, 0)).collect();
    let mut first_error: Option<CacheError> = None;
    let mut overflow = false;

    while let Some((path, depth)) = queue.pop_front() {
      let fired = self.state.triggers.matching(&path);
      if fired.is_empty() {
        continue;
      }
      if depth >= max {
        overflow = true;
        tracing::warn!(
          cache = %self.cache.name(),
          path = %path,
          max,
          "Trigger cascade depth exceeded, dropping remaining changes"
        );
        queue.clear();
        break;
      }

      for (trigger, captures) in fired {
        self.cache.activity.record_firing();
        tracing::trace!(cache = %self.cache.name(), id = %trigger.id, path = %path, depth, "Firing trigger");
        if let Err(e) = self.run(&trigger.command, &captures) {
          tracing::warn!(
            cache = %self.cache.name(),
            id = %trigger.id,
            path = %path,
            error = %e,
            "Trigger failed"
          );
          first_error.get_or_insert_with(|| CacheError::TriggerFailed {
            id: trigger.id.clone(),
            message: e.to_string(),
          });
        }
        queue.extend(self.changes.drain(..).map(|p| (p, depth + 1)));
      }
    }

    self.changes.clear();
    if overflow {
      return Err(CacheError::CascadeOverflow { max });
    }
    match first_error {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }
}

/// The wildcard pattern of a FOR loop, written as `${{pattern}}`.
fn loop_pattern(expanded: &str) -> CacheResult<Path> {
  let text = expanded.trim();
  let spans = flat_spans(text);
  if spans.len() != 1 || spans[0] != (0, text.len()) {
    return Err(CacheError::validation(format!(
      "FOR expects a single ${{{{pattern}}}}, got '{}'",
      expanded
    )));
  }
  let pattern = Path::parse(text[3..text.len() - 2].trim())?;
  if !pattern.has_wildcard() {
    return Err(CacheError::validation(format!(
      "FOR pattern '{}' has no wildcard",
      pattern
    )));
  }
  Ok(pattern)
}
