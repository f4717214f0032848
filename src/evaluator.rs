//! The sandboxed evaluator.
//!
//! Runs untrusted JavaScript in a fresh engine realm with a capturing
//! console as the only injected data binding, buffers everything the code
//! logs, and flushes the accumulated output to an observer: once when the
//! synchronous phase completes, then once per logging call made by deferred
//! callbacks. A thrown error is appended to the output instead of
//! propagating; the observer cannot tell a crash from a clean run.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::vm::RuntimeLimits;
use boa_engine::{Context, JsArgs, JsError, JsString, JsValue, NativeFunction, Source};
use boa_gc::{custom_trace, empty_trace, Finalize, Trace};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::EvalConfig;
use crate::console::{ConsoleCapture, ConsoleLevel, HostSink, TracingSink};
use crate::error::{Error, Result};
use crate::timers::TimerQueue;

/// Observer for flushed output, shared by the four console methods and the
/// completion flush of one run.
type Observer = Rc<RefCell<dyn FnMut(String)>>;

/// Summary of a finished evaluation run.
///
/// Deliberately carries no error flag: a run whose code threw and a run
/// that returned normally both complete with a summary, the only difference
/// being the output text itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalSummary {
    /// Final accumulated output, identical to the last flush payload.
    pub output: String,
    /// Lines captured into the buffer.
    pub lines: usize,
    /// Lines dropped past the configured cap.
    pub dropped_lines: usize,
    /// Flushes delivered to the observer.
    pub flushes: usize,
    /// Deferred callbacks that ran after the synchronous phase.
    pub deferred_jobs: usize,
    /// Wall-clock duration of the whole run, deferred phase included.
    pub duration: Duration,
}

/// Evaluates untrusted code strings in isolated realms.
///
/// Holds only immutable configuration and the host sink. All per-run state
/// (realm, buffer, done flag, timer queue) is created fresh inside
/// [`evaluate`](Self::evaluate), so overlapping runs stay independent.
pub struct Evaluator {
    config: EvalConfig,
    sink: Arc<dyn HostSink>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(EvalConfig::default())
    }
}

impl Evaluator {
    /// Creates an evaluator that forwards guest console output to `tracing`.
    pub fn new(config: EvalConfig) -> Self {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    /// Creates an evaluator with a custom host sink.
    pub fn with_sink(config: EvalConfig, sink: Arc<dyn HostSink>) -> Self {
        Self { config, sink }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Evaluates `code` and delivers accumulated output to `observer`.
    ///
    /// The observer is invoked one or more times; every invocation carries
    /// the entire buffer-so-far (later flushes replace earlier ones). The
    /// first flush happens when the synchronous phase completes, even if
    /// nothing was logged (an empty run flushes the empty string); each
    /// logging call made afterwards by a deferred callback or a promise
    /// reaction flushes again.
    ///
    /// Code that never terminates never returns; the only backstops are the
    /// engine limits configured in [`EvalConfig`].
    pub fn evaluate<F>(&self, code: &str, observer: F) -> Result<EvalSummary>
    where
        F: FnMut(String) + 'static,
    {
        if code.len() > self.config.max_code_bytes {
            return Err(Error::CodeTooLarge {
                max: self.config.max_code_bytes,
                actual: code.len(),
            });
        }

        let start = Instant::now();

        let state = Rc::new(RefCell::new(ConsoleCapture::new(
            self.config.max_captured_lines,
        )));
        let observer: Observer = Rc::new(RefCell::new(observer));
        let queue = Rc::new(RefCell::new(TimerQueue::new()));

        let mut context = Context::default();
        let mut limits = RuntimeLimits::default();
        if let Some(limit) = self.config.loop_iteration_limit {
            limits.set_loop_iteration_limit(limit);
        }
        if let Some(limit) = self.config.recursion_limit {
            limits.set_recursion_limit(limit);
        }
        if let Some(limit) = self.config.stack_size_limit {
            limits.set_stack_size_limit(limit);
        }
        context.set_runtime_limits(limits);

        self.install_console(&mut context, &state, &observer)?;
        install_timers(&mut context, &queue)?;

        tracing::debug!(bytes = code.len(), "starting evaluation run");

        // Synchronous phase. Parse failures and runtime throws land in the
        // same place: one appended line, no caller-visible error.
        if let Err(err) = context.eval(Source::from_bytes(code)) {
            let message = thrown_message(err, &mut context);
            state.borrow_mut().record(message);
        }

        state.borrow_mut().mark_done();
        deliver(&state, &observer);

        let _ = context.run_jobs();
        let deferred_jobs = self.drain_timers(&mut context, &queue);

        let capture = state.borrow();
        let summary = EvalSummary {
            output: capture.joined(),
            lines: capture.line_count(),
            dropped_lines: capture.dropped(),
            flushes: capture.flush_count(),
            deferred_jobs,
            duration: start.elapsed(),
        };

        tracing::debug!(
            lines = summary.lines,
            flushes = summary.flushes,
            deferred = summary.deferred_jobs,
            "evaluation run finished"
        );

        Ok(summary)
    }

    /// Installs the capturing console as the realm's injected binding.
    fn install_console(
        &self,
        context: &mut Context,
        state: &Rc<RefCell<ConsoleCapture>>,
        observer: &Observer,
    ) -> Result<()> {
        let mut console = ObjectInitializer::new(context);
        for level in ConsoleLevel::ALL {
            console.function(
                capture_method(
                    level,
                    Rc::clone(state),
                    Rc::clone(observer),
                    Arc::clone(&self.sink),
                ),
                JsString::from(level.method_name()),
                0,
            );
        }
        let console = console.build();

        context
            .register_global_property(JsString::from("console"), console, Attribute::all())
            .map_err(|e| Error::Internal(format!("failed to install console binding: {e}")))
    }

    /// Drains the timer queue in event-loop order, running promise jobs
    /// after each callback. Returns the number of callbacks executed.
    fn drain_timers(&self, context: &mut Context, queue: &Rc<RefCell<TimerQueue>>) -> usize {
        let mut executed = 0usize;
        loop {
            if executed >= self.config.max_deferred_jobs {
                let remaining = queue.borrow().len();
                if remaining > 0 {
                    tracing::warn!(
                        limit = self.config.max_deferred_jobs,
                        remaining,
                        "deferred callback budget exhausted; dropping remaining callbacks"
                    );
                }
                queue.borrow_mut().clear();
                break;
            }

            let job = queue.borrow_mut().take_next();
            let Some(job) = job else { break };
            executed += 1;

            // The synchronous catch has already exited; a throw here goes to
            // the host log, never to the buffer.
            if let Err(err) = job.callback.call(&JsValue::undefined(), &[], context) {
                let message = thrown_message(err, context);
                tracing::warn!(timer = job.id(), error = %message, "deferred callback threw");
            }
            let _ = context.run_jobs();
        }
        executed
    }
}

/// Runs the blocking evaluator on a dedicated thread, forwarding every
/// flush over `output_tx`. The channel sees the same payloads an inline
/// observer would: full buffer contents, replace-not-append.
pub async fn evaluate_streaming(
    evaluator: Evaluator,
    code: String,
    output_tx: mpsc::UnboundedSender<String>,
) -> Result<EvalSummary> {
    tokio::task::spawn_blocking(move || {
        evaluator.evaluate(&code, move |text| {
            if output_tx.send(text).is_err() {
                tracing::warn!("flush receiver dropped");
            }
        })
    })
    .await
    .map_err(|e| Error::Internal(format!("evaluation task failed: {e}")))?
}

/// Captures for one console method. Holds no engine objects.
#[derive(Finalize)]
struct ConsoleGlue {
    level: ConsoleLevel,
    state: Rc<RefCell<ConsoleCapture>>,
    observer: Observer,
    sink: Arc<dyn HostSink>,
}

unsafe impl Trace for ConsoleGlue {
    empty_trace!();
}

/// Captures for the timer builtins. The queued callbacks are engine objects
/// and must stay reachable for the collector until drained.
#[derive(Finalize)]
struct TimerGlue {
    queue: Rc<RefCell<TimerQueue>>,
}

unsafe impl Trace for TimerGlue {
    custom_trace!(this, mark, {
        for job in this.queue.borrow().pending() {
            mark(&job.callback);
        }
    });
}

/// Builds one capturing console method: forward to the host sink, record
/// into the buffer, flush immediately if the run is already done.
fn capture_method(
    level: ConsoleLevel,
    state: Rc<RefCell<ConsoleCapture>>,
    observer: Observer,
    sink: Arc<dyn HostSink>,
) -> NativeFunction {
    unsafe {
        NativeFunction::from_closure_with_captures(
            move |_this, args, captures, ctx| {
                // TODO: pretty-print object arguments instead of relying on
                // engine ToString ("[object Object]").
                let mut parts = Vec::with_capacity(args.len());
                for arg in args {
                    parts.push(arg.to_string(ctx)?.to_std_string_escaped());
                }
                let line = parts.join("\n");

                captures.sink.forward(captures.level, &line);

                let ready = {
                    let mut capture = captures.state.borrow_mut();
                    capture.record(line);
                    capture.is_done()
                };
                if ready {
                    deliver(&captures.state, &captures.observer);
                }
                Ok(JsValue::undefined())
            },
            ConsoleGlue {
                level,
                state,
                observer,
                sink,
            },
        )
    }
}

/// Registers `setTimeout`/`clearTimeout` as host-ambient globals backed by
/// the per-run queue.
fn install_timers(context: &mut Context, queue: &Rc<RefCell<TimerQueue>>) -> Result<()> {
    let set_timeout = unsafe {
        NativeFunction::from_closure_with_captures(
            move |_this, args, captures, ctx| {
                let Some(callback) = args.get_or_undefined(0).as_callable() else {
                    return Ok(JsValue::undefined());
                };
                let delay = args.get_or_undefined(1).to_number(ctx)?;
                let id = captures.queue.borrow_mut().schedule(callback.clone(), delay);
                Ok(JsValue::from(id))
            },
            TimerGlue {
                queue: Rc::clone(queue),
            },
        )
    };

    let clear_timeout = unsafe {
        NativeFunction::from_closure_with_captures(
            move |_this, args, captures, ctx| {
                let id = args.get_or_undefined(0).to_u32(ctx)?;
                captures.queue.borrow_mut().cancel(id);
                Ok(JsValue::undefined())
            },
            TimerGlue {
                queue: Rc::clone(queue),
            },
        )
    };

    context
        .register_global_builtin_callable(JsString::from("setTimeout"), 1, set_timeout)
        .map_err(|e| Error::Internal(format!("failed to install setTimeout: {e}")))?;
    context
        .register_global_builtin_callable(JsString::from("clearTimeout"), 1, clear_timeout)
        .map_err(|e| Error::Internal(format!("failed to install clearTimeout: {e}")))?;
    Ok(())
}

/// Joins the buffer-so-far and hands it to the observer.
fn deliver(state: &Rc<RefCell<ConsoleCapture>>, observer: &Observer) {
    let text = {
        let mut capture = state.borrow_mut();
        capture.note_flush();
        capture.joined()
    };
    (observer.borrow_mut())(text);
}

/// Extracts the message of a thrown value: the `message` property of a
/// thrown object, the ToString of any other thrown value, the engine's own
/// rendering for native errors (parse failures included).
fn thrown_message(err: JsError, context: &mut Context) -> String {
    if let Some(value) = err.as_opaque() {
        if let Some(object) = value.as_object() {
            if let Ok(message) = object.get(JsString::from("message"), context) {
                if !message.is_undefined() {
                    if let Ok(text) = message.to_string(context) {
                        return text.to_std_string_escaped();
                    }
                }
            }
        }
        if let Ok(text) = value.to_string(context) {
            return text.to_std_string_escaped();
        }
    }
    err.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(code: &str) -> (EvalSummary, Vec<String>) {
        let evaluator = Evaluator::new(EvalConfig::default());
        let flushes = Rc::new(RefCell::new(Vec::new()));
        let flushes_out = Rc::clone(&flushes);
        let summary = evaluator
            .evaluate(code, move |text| flushes_out.borrow_mut().push(text))
            .expect("evaluation failed");
        let flushes = flushes.borrow().clone();
        (summary, flushes)
    }

    #[test]
    fn summary_matches_final_flush() {
        let (summary, flushes) = collect("console.log('hello');");

        assert_eq!(summary.output, "hello");
        assert_eq!(flushes.last().unwrap(), &summary.output);
        assert_eq!(summary.flushes, flushes.len());
    }

    #[test]
    fn runs_do_not_share_state() {
        let (first, _) = collect("console.log('first');");
        let (second, _) = collect("console.log('second');");

        assert_eq!(first.output, "first");
        assert_eq!(second.output, "second");
    }

    #[test]
    fn thrown_object_message_is_extracted() {
        let (summary, _) = collect("throw new Error('bang');");
        assert_eq!(summary.output, "bang");
    }

    #[test]
    fn thrown_non_object_uses_to_string() {
        let (summary, _) = collect("throw 'plain';");
        assert_eq!(summary.output, "plain");
    }
}
