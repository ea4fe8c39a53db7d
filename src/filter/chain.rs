use super::Filter;
use crate::context::Context;
use crate::error::StateError;
use std::sync::Arc;
use tracing::debug;

/// Continuation handed to a filter: the rest of the chain.
pub type NextFn = dyn Fn(&Context) -> Result<(), StateError> + Send + Sync;

/// The step at the end of the chain, normally the backend exchange.
pub type TerminalFn = Box<NextFn>;

/// Ordered composition of filters around a terminal step, built once at
/// startup.
///
/// Layout, outermost first: global filters, then selective filters, then the
/// terminal. Selective filters are present in every chain but gated at
/// request time on the endpoint's `filters` metadata; an unreferenced
/// selective filter passes straight through.
pub struct FilterChain {
    entry: Box<NextFn>,
    depth: usize,
}

impl FilterChain {
    pub fn new(
        globals: &[Arc<dyn Filter>],
        selectives: &[Arc<dyn Filter>],
        terminal: TerminalFn,
    ) -> Self {
        let depth = globals.len() + selectives.len();
        let mut next: Box<NextFn> = terminal;

        for filter in selectives.iter().rev() {
            let filter = filter.clone();
            let inner = next;
            next = Box::new(move |ctx: &Context| {
                let selected = ctx
                    .endpoint()
                    .map(|ep| ep.filters.iter().any(|id| id == filter.type_id()))
                    .unwrap_or(false);
                if selected {
                    filter.invoke(ctx, &*inner)
                } else {
                    inner(ctx)
                }
            });
        }

        for filter in globals.iter().rev() {
            let filter = filter.clone();
            let inner = next;
            next = Box::new(move |ctx: &Context| filter.invoke(ctx, &*inner));
        }

        Self { entry: next, depth }
    }

    pub fn run(&self, ctx: &Context) -> Result<(), StateError> {
        debug!(
            request_id = %ctx.request_id(),
            filters = self.depth,
            "Filter chain start"
        );
        (self.entry)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextPool, RequestReader};
    use crate::model::decode_endpoint;
    use std::sync::Mutex;

    struct RecordingFilter {
        id: &'static str,
        ord: i32,
        calls: Arc<Mutex<Vec<String>>>,
        short_circuit: bool,
    }

    impl Filter for RecordingFilter {
        fn type_id(&self) -> &'static str {
            self.id
        }

        fn order(&self) -> i32 {
            self.ord
        }

        fn invoke(&self, ctx: &Context, next: &NextFn) -> Result<(), StateError> {
            self.calls.lock().unwrap().push(format!("{}:enter", self.id));
            if self.short_circuit {
                return Err(StateError::new(403, "TEST:DENY", "denied"));
            }
            let result = next(ctx);
            self.calls.lock().unwrap().push(format!("{}:exit", self.id));
            result
        }
    }

    fn test_ctx(filters: &[&str]) -> Box<Context> {
        let pool = ContextPool::new();
        let mut ctx = pool.acquire();
        let mut ep = decode_endpoint(
            br#"{"httpMethod":"GET","httpPattern":"/x","upstream":{"proto":"mock"}}"#,
        )
        .unwrap();
        ep.filters = filters.iter().map(|s| s.to_string()).collect();
        ctx.reattach("chain-test".into(), RequestReader::default(), Some(Arc::new(ep)));
        ctx
    }

    fn recorder(
        id: &'static str,
        ord: i32,
        calls: &Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn Filter> {
        Arc::new(RecordingFilter {
            id,
            ord,
            calls: calls.clone(),
            short_circuit: false,
        })
    }

    #[test]
    fn test_globals_wrap_in_order_around_terminal() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let globals = vec![recorder("a", 0, &calls), recorder("b", 0, &calls)];
        let terminal_calls = calls.clone();
        let chain = FilterChain::new(
            &globals,
            &[],
            Box::new(move |_| {
                terminal_calls.lock().unwrap().push("terminal".into());
                Ok(())
            }),
        );
        chain.run(&test_ctx(&[])).unwrap();
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["a:enter", "b:enter", "terminal", "b:exit", "a:exit"]
        );
    }

    #[test]
    fn test_unreferenced_selective_filter_is_skipped() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let selectives = vec![recorder("picked", 0, &calls), recorder("ignored", 0, &calls)];
        let chain = FilterChain::new(&[], &selectives, Box::new(|_| Ok(())));
        chain.run(&test_ctx(&["picked"])).unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["picked:enter", "picked:exit"]);
    }

    #[test]
    fn test_short_circuit_skips_terminal() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let deny: Arc<dyn Filter> = Arc::new(RecordingFilter {
            id: "deny",
            ord: 0,
            calls: calls.clone(),
            short_circuit: true,
        });
        let terminal_calls = calls.clone();
        let chain = FilterChain::new(
            &[deny],
            &[],
            Box::new(move |_| {
                terminal_calls.lock().unwrap().push("terminal".into());
                Ok(())
            }),
        );
        let err = chain.run(&test_ctx(&[])).unwrap_err();
        assert_eq!(err.status_code, 403);
        assert_eq!(*calls.lock().unwrap(), vec!["deny:enter"]);
    }
}
