//! End-to-end scenarios over the full stack: gateway, service, instances,
//! autoscaler, telemetry.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use gridsim_autoscale::{AutoscalerParams, HorizontalAutoscaler};
use gridsim_core::{
    Client, DistributionConfig, Instance, InstanceFactory, Message, SendOptions, SimContext,
    SimFault, StatusCode, Telemetry,
};
use gridsim_proxy::{Gateway, Service};
use gridsim_server::{EndpointSpec, ServerInstance, ServerParams, StaticEndpointConfig};
use gridsim_telemetry::MemorySink;

/// A context wired with a memory sink, a gateway routing `svc`, and a
/// one-endpoint service.
fn harness(
    seed: u64,
    params: ServerParams,
    cost: DistributionConfig,
    replicas: usize,
) -> (SimContext, Rc<MemorySink>, Rc<Service>) {
    let ctx = SimContext::new(seed);
    let sink = Rc::new(MemorySink::new());
    ctx.set_telemetry(Rc::clone(&sink) as Rc<dyn Telemetry>);

    let gateway = Gateway::new(&ctx, Some("gw"), vec!["svc".to_string()]);
    ctx.set_gateway(gateway);

    let endpoint_factory = StaticEndpointConfig {
        endpoints: vec![EndpointSpec {
            endpoint_name: "/api".to_string(),
            dependencies: vec![],
            computation_time: cost,
        }],
    }
    .build_factory()
    .unwrap();

    let factory: InstanceFactory = Rc::new(move |ctx: &SimContext, service: &str| {
        let name = ctx.gen_name(&format!("{service}-inst"));
        ServerInstance::new(ctx, &name, Some(service), params.clone(), &endpoint_factory)
            as Rc<dyn Instance>
    });
    let service = Service::new(&ctx, "svc", factory, None, replicas);
    (ctx, sink, service)
}

fn flat_params(threads: usize) -> ServerParams {
    ServerParams {
        cpu_quota: 1.0,
        threads,
        queue_size: None,
        start_up_delay: Duration::ZERO,
        warming_up_time: Duration::ZERO,
        warming_up_factor_init: 2.0,
        shut_down_delay: Duration::from_secs(1),
    }
}

type Outcome = Rc<Cell<Option<Result<(), SimFault>>>>;

fn observe(ctx: &SimContext, promise: gridsim_core::ExchangePromise) -> Outcome {
    let outcome: Outcome = Rc::new(Cell::new(None));
    let seen = Rc::clone(&outcome);
    ctx.kernel().spawn("observer", async move {
        seen.set(Some(promise.wait().await.map(|_| ())));
        Ok(())
    });
    outcome
}

#[test]
fn single_request_succeeds_after_one_second() {
    let (ctx, sink, _service) =
        harness(42, flat_params(2), DistributionConfig::fixed(1.0), 1);

    let client = Client::new(&ctx, "driver");
    let outcome = observe(&ctx, client.send_request("svc", "/api", Message::default()));

    ctx.simulate(Duration::from_secs(10)).unwrap();

    assert_eq!(outcome.get(), Some(Ok(())));
    assert_eq!(sink.request_statuses(), vec!["SUCCEED"]);
    // sent at t=0, served in 1.0 s of compute, zero-delay network.
    let response_time = sink.records_for("response_time")[0].fields["value"];
    assert!(
        (response_time - 1.0).abs() < 1e-6,
        "response took {response_time}"
    );
}

#[test]
fn timed_out_request_records_exactly_once() {
    let (ctx, sink, _service) =
        harness(42, flat_params(2), DistributionConfig::fixed(5.0), 1);

    let client = Client::new(&ctx, "driver");
    let outcome = observe(
        &ctx,
        client.send_request_with(
            "svc",
            "/api",
            Message::default(),
            SendOptions {
                timeout: Some(Duration::from_secs(1)),
                ..SendOptions::default()
            },
        ),
    );

    // Run well past the late 5 s completion.
    ctx.simulate(Duration::from_secs(20)).unwrap();

    assert_eq!(
        outcome.get(),
        Some(Err(SimFault::Status(StatusCode::Timeout)))
    );
    assert_eq!(sink.request_count(), 1);
    assert_eq!(sink.request_statuses(), vec!["TIMEOUT"]);
}

#[test]
fn request_before_any_instance_is_active_is_refused() {
    let mut params = flat_params(2);
    params.start_up_delay = Duration::from_secs(5);
    let (ctx, sink, _service) = harness(42, params, DistributionConfig::fixed(0.1), 1);

    let client = Client::new(&ctx, "driver");
    let outcome = observe(&ctx, client.send_request("svc", "/api", Message::default()));

    ctx.simulate(Duration::from_secs(1)).unwrap();
    assert_eq!(
        outcome.get(),
        Some(Err(SimFault::Status(StatusCode::ConnectionRefused)))
    );
    assert_eq!(sink.request_statuses(), vec!["CONNECTION_REFUSED"]);
}

#[test]
fn autoscaler_adds_instances_under_sustained_load() {
    let (ctx, _sink, service) =
        harness(7, flat_params(2), DistributionConfig::fixed(0.2), 1);
    let mut scaling = AutoscalerParams::new("cpu_utilization", 0.5);
    scaling.max_num = 5;
    HorizontalAutoscaler::new(&ctx, Rc::clone(&service), scaling);

    gridsim_loadgen::RpsLoadGenerator::new(
        &ctx,
        Some("traffic"),
        gridsim_loadgen::RpsParams {
            rps: 20.0,
            host: "svc".to_string(),
            endpoint: "/api".to_string(),
            timeout: None,
            by_proxy: false,
            request: Message::default(),
        },
    );

    assert_eq!(service.instance_count(), 1);
    ctx.simulate(Duration::from_secs(40)).unwrap();
    assert!(
        service.instance_count() > 1,
        "expected a scale-up, still at {}",
        service.instance_count()
    );
}

#[test]
fn identical_seeds_replay_identical_runs() {
    let run = |seed: u64| {
        let cost = DistributionConfig {
            mean: gridsim_core::Scalar::Num(0.1),
            std: gridsim_core::Scalar::Num(0.05),
            kind: "lognormal".to_string(),
        };
        let (ctx, sink, _service) = harness(seed, flat_params(2), cost, 2);
        gridsim_loadgen::RpsLoadGenerator::new(
            &ctx,
            Some("traffic"),
            gridsim_loadgen::RpsParams {
                rps: 10.0,
                host: "svc".to_string(),
                endpoint: "/api".to_string(),
                timeout: None,
                by_proxy: false,
                request: Message::default(),
            },
        );
        ctx.simulate(Duration::from_secs(10)).unwrap();
        sink.records()
    };

    let first = run(7);
    let second = run(7);
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn scale_down_drains_removed_instances() {
    let (ctx, sink, service) =
        harness(3, flat_params(2), DistributionConfig::fixed(0.05), 3);
    ctx.simulate(Duration::from_secs(1)).unwrap();
    assert_eq!(service.active_instances().len(), 3);

    service.scale_to(1);
    assert_eq!(service.instance_count(), 1);

    // Traffic keeps flowing to the survivor.
    let client = Client::new(&ctx, "driver");
    let outcome = observe(&ctx, client.send_request("svc", "/api", Message::default()));
    ctx.simulate(Duration::from_secs(5)).unwrap();
    assert_eq!(outcome.get(), Some(Ok(())));
    assert!(sink.request_statuses().contains(&"SUCCEED".to_string()));
}
