//! The request exchange protocol.
//!
//! A send resolves the receiver through a proxy, then runs the exchange as
//! a chain of promises: outbound transmission → delivery → the receiver's
//! server promise → return transmission. Lifecycle timestamps land on the
//! [`RequestContext`] along the way and exactly one telemetry record is
//! emitted per request, on success and failure alike.
//!
//! A configured timeout races a timer against the whole exchange. When the
//! timer wins the context is failed with TIMEOUT (rejecting the server
//! promise, so no success fields can be written afterwards) and the
//! abandoned exchange settlement is defused.

use std::rc::Rc;
use std::time::Duration;

use gridsim_kernel::Promise;

use crate::component::{Component, Proxy};
use crate::context::SimContext;
use crate::error::{SimFault, StatusCode};
use crate::request::{ExchangePromise, Message, RequestContext, RequestRef};

/// Optional send parameters. Defaults: no timeout, route via the context
/// gateway, resolve the receiver by host name.
#[derive(Default)]
pub struct SendOptions {
    /// Fail the exchange with TIMEOUT if it has not settled in time.
    pub timeout: Option<Duration>,
    /// Route through this proxy instead of the gateway.
    pub proxy: Option<Rc<dyn Proxy>>,
    /// Deliver to the proxy itself instead of resolving an instance —
    /// routing is delegated wholesale.
    pub by_proxy: bool,
}

/// Issues requests on behalf of an owning component; the owner's name is
/// the sender for network-delay purposes.
pub struct Client {
    ctx: SimContext,
    owner: String,
}

impl Client {
    pub fn new(ctx: &SimContext, owner: &str) -> Self {
        Client {
            ctx: ctx.clone(),
            owner: owner.to_string(),
        }
    }

    /// Send with default options.
    pub fn send_request(&self, host: &str, endpoint: &str, request: Message) -> ExchangePromise {
        self.send_request_with(host, endpoint, request, SendOptions::default())
    }

    /// Send a request and return the promise of its exchange outcome.
    ///
    /// The returned promise may be dropped freely — the request records its
    /// own telemetry when it ends.
    pub fn send_request_with(
        &self,
        host: &str,
        endpoint: &str,
        request: Message,
        options: SendOptions,
    ) -> ExchangePromise {
        let kernel = self.ctx.kernel();
        let proxy = options.proxy.unwrap_or_else(|| self.ctx.gateway());
        let rc = RequestContext::new(&kernel, request);
        rc.set_sent(kernel.now());

        let receiver = if options.by_proxy {
            rc.set_instance_name(proxy.name());
            Some(proxy.as_component())
        } else {
            rc.set_host_name(host);
            rc.set_endpoint_name(endpoint);
            proxy.find_component(host, endpoint, &rc)
        };

        let exchange = match receiver {
            Some(receiver) => self.exchange_chain(&rc, receiver, host, endpoint),
            None => {
                // Nothing to route to; the refusal surfaces through the
                // returned promise, so the server promise's rejection is
                // intentionally unobserved.
                rc.fail(kernel.now(), StatusCode::ConnectionRefused);
                rc.server_promise().defuse();
                let refused: ExchangePromise = Promise::new(&kernel);
                refused.reject(SimFault::Status(StatusCode::ConnectionRefused));
                refused
            }
        };

        // One record per request, whichever way the exchange settles.
        {
            let exchange = exchange.clone();
            let rc = Rc::clone(&rc);
            let ctx = self.ctx.clone();
            kernel.spawn("client.record", async move {
                let _ = exchange.wait().await;
                if rc.mark_recorded() {
                    ctx.telemetry().record_ended_request(&rc);
                }
                Ok(())
            });
        }

        let Some(timeout) = options.timeout else {
            return exchange;
        };

        let timeout_promise: ExchangePromise = Promise::new(&kernel);
        {
            let rc = Rc::clone(&rc);
            let kernel = kernel.clone();
            let timer = timeout_promise.clone();
            self.ctx.kernel().spawn("client.timeout", async move {
                kernel.sleep(timeout).await;
                if rc.status().is_none() {
                    rc.set_timeout();
                    rc.fail(kernel.now(), StatusCode::Timeout);
                }
                timer.reject(SimFault::Status(StatusCode::Timeout));
                Ok(())
            });
        }
        Promise::race(&kernel, vec![exchange, timeout_promise])
    }

    /// The exchange DAG for a resolved receiver.
    fn exchange_chain(
        &self,
        rc: &RequestRef,
        receiver: Rc<dyn Component>,
        host: &str,
        endpoint: &str,
    ) -> ExchangePromise {
        let kernel = self.ctx.kernel();
        let receiver_name = receiver.name().to_string();
        let host = host.to_string();
        let endpoint = endpoint.to_string();

        let start: Promise<(), SimFault> = Promise::resolved(&kernel, ());

        let delivered = {
            let ctx = self.ctx.clone();
            let rc = Rc::clone(rc);
            let sender = self.owner.clone();
            let receiver_name = receiver_name.clone();
            start.then(move |_| async move {
                let outbound = ctx
                    .network()
                    .transmit(rc.request(), &sender, &receiver_name);
                match outbound.await {
                    Ok(()) => {
                        receiver.recv_request(&host, &endpoint, Rc::clone(&rc));
                        Ok(())
                    }
                    Err(fault) => {
                        // Network failure: fail immediately, nothing ever
                        // reaches the server side.
                        rc.fail(ctx.now(), fault.code());
                        Err(fault)
                    }
                }
            })
        };

        let served = {
            let rc = Rc::clone(rc);
            delivered.then(move |_| async move { rc.server_promise().wait().await })
        };

        {
            let ctx = self.ctx.clone();
            let rc = Rc::clone(rc);
            let sender = self.owner.clone();
            served.then(move |response| async move {
                let inbound = ctx.network().transmit(&response, &receiver_name, &sender);
                match inbound.await {
                    Ok(()) => {
                        rc.set_resp_arrived(ctx.now());
                        Ok(response)
                    }
                    Err(fault) => {
                        rc.fail(ctx.now(), fault.code());
                        Err(fault)
                    }
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Network, TransmitFuture};
    use crate::telemetry::Telemetry;
    use gridsim_kernel::SimTime;
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeMap;

    /// Completes every request with a fixed service delay.
    struct EchoServer {
        name: String,
        ctx: SimContext,
        delay: Duration,
    }

    impl Component for EchoServer {
        fn name(&self) -> &str {
            &self.name
        }

        fn recv_request(&self, _host: &str, _endpoint: &str, rc: RequestRef) {
            rc.set_instance_name(&self.name);
            rc.set_arrived(self.ctx.now());
            rc.set_proc_started(self.ctx.now());
            let ctx = self.ctx.clone();
            let delay = self.delay;
            self.ctx.kernel().spawn("echo.serve", async move {
                ctx.kernel().sleep(delay).await;
                rc.complete(ctx.now(), Message::default());
                Ok(())
            });
        }
    }

    struct FixedProxy {
        name: String,
        target: Rc<dyn Component>,
    }

    impl Component for FixedProxy {
        fn name(&self) -> &str {
            &self.name
        }

        fn recv_request(&self, host: &str, endpoint: &str, rc: RequestRef) {
            self.target.recv_request(host, endpoint, rc);
        }
    }

    impl Proxy for FixedProxy {
        fn find_component(
            &self,
            _host: &str,
            _endpoint: &str,
            _rc: &RequestRef,
        ) -> Option<Rc<dyn Component>> {
            Some(Rc::clone(&self.target))
        }

        fn as_component(self: Rc<Self>) -> Rc<dyn Component> {
            self
        }
    }

    /// Counts request records.
    #[derive(Default)]
    struct CountingSink {
        requests: Cell<u32>,
        statuses: RefCell<Vec<String>>,
    }

    impl Telemetry for Rc<CountingSink> {
        fn record(
            &self,
            _measurement: &str,
            _tags: BTreeMap<String, String>,
            _fields: BTreeMap<String, f64>,
            _time: SimTime,
        ) {
        }

        fn record_ended_request(&self, rc: &RequestContext) {
            self.requests.set(self.requests.get() + 1);
            let status = if rc.is_timeout() {
                "TIMEOUT".to_string()
            } else {
                rc.status().map(|s| s.to_string()).unwrap_or_default()
            };
            self.statuses.borrow_mut().push(status);
        }
    }

    /// Always rejects the outbound leg.
    struct BrokenNetwork;

    impl Network for BrokenNetwork {
        fn transmit(&self, _message: &Message, _sender: &str, _receiver: &str) -> TransmitFuture {
            Box::pin(async { Err(SimFault::Status(StatusCode::ConnectionClosed)) })
        }
    }

    fn harness(delay: Duration) -> (SimContext, Rc<CountingSink>) {
        let ctx = SimContext::new(1);
        let server = Rc::new(EchoServer {
            name: "server-a".to_string(),
            ctx: ctx.clone(),
            delay,
        });
        let proxy = Rc::new(FixedProxy {
            name: "gw".to_string(),
            target: server,
        });
        ctx.set_gateway(proxy);
        let sink = Rc::new(CountingSink::default());
        ctx.set_telemetry(Rc::new(Rc::clone(&sink)));
        (ctx, sink)
    }

    #[test]
    fn exchange_completes_and_records_once() {
        let (ctx, sink) = harness(Duration::from_secs(1));
        let client = Client::new(&ctx, "tester");
        let seen = Rc::new(Cell::new(None));

        let promise = client.send_request("svc", "/api", Message::default());
        let s = Rc::clone(&seen);
        ctx.kernel().spawn("observer", async move {
            s.set(Some(promise.wait().await.is_ok()));
            Ok(())
        });

        ctx.run_until_idle().unwrap();
        assert_eq!(seen.get(), Some(true));
        assert_eq!(sink.requests.get(), 1);
        assert_eq!(sink.statuses.borrow()[0], "SUCCEED");
        assert_eq!(ctx.now(), SimTime::from_secs_f64(1.0));
    }

    #[test]
    fn timeout_wins_the_race_and_suppresses_the_late_completion() {
        let (ctx, sink) = harness(Duration::from_secs(5));
        let client = Client::new(&ctx, "tester");
        let outcome = Rc::new(Cell::new(None));

        let promise = client.send_request_with(
            "svc",
            "/api",
            Message::default(),
            SendOptions {
                timeout: Some(Duration::from_secs(1)),
                ..SendOptions::default()
            },
        );
        let o = Rc::clone(&outcome);
        ctx.kernel().spawn("observer", async move {
            o.set(Some(promise.wait().await.map(|_| ())));
            Ok(())
        });

        // Run past the late 5 s completion.
        ctx.simulate(Duration::from_secs(10)).unwrap();
        assert_eq!(
            outcome.get(),
            Some(Err(SimFault::Status(StatusCode::Timeout)))
        );
        // Exactly one record, tagged TIMEOUT, despite the 5 s completion.
        assert_eq!(sink.requests.get(), 1);
        assert_eq!(sink.statuses.borrow()[0], "TIMEOUT");
    }

    #[test]
    fn network_failure_fails_fast_without_server_processing() {
        let (ctx, sink) = harness(Duration::from_secs(1));
        ctx.set_network(Rc::new(BrokenNetwork));
        let client = Client::new(&ctx, "tester");
        let outcome = Rc::new(Cell::new(None));

        let promise = client.send_request("svc", "/api", Message::default());
        let o = Rc::clone(&outcome);
        ctx.kernel().spawn("observer", async move {
            o.set(Some(promise.wait().await.map(|_| ())));
            Ok(())
        });

        ctx.run_until_idle().unwrap();
        assert_eq!(
            outcome.get(),
            Some(Err(SimFault::Status(StatusCode::ConnectionClosed)))
        );
        assert_eq!(sink.requests.get(), 1);
        // The server never stamped anything.
        assert_eq!(sink.statuses.borrow()[0], "CONNECTION_CLOSED");
    }

    #[test]
    fn by_proxy_delivers_to_the_proxy_itself() {
        let (ctx, _sink) = harness(Duration::ZERO);
        let client = Client::new(&ctx, "tester");
        let done = Rc::new(Cell::new(false));

        let promise = client.send_request_with(
            "svc",
            "/api",
            Message::default(),
            SendOptions {
                by_proxy: true,
                ..SendOptions::default()
            },
        );
        let d = Rc::clone(&done);
        ctx.kernel().spawn("observer", async move {
            d.set(promise.wait().await.is_ok());
            Ok(())
        });
        ctx.run_until_idle().unwrap();
        assert!(done.get());
    }
}
