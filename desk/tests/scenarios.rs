use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use desk::distribution::{constant, load_sampler};
use desk::standard::{ArrivalProcess, Generator, GeneratorConfig, Queue, Server, ServerConfig};
use desk::{Load, SandboxId, Simulation, TimeUnit};
use float_cmp::approx_eq;
use testing::{ConstantDistribution, SequenceDistribution};

const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(24 * 3600);

type Log = Rc<RefCell<Vec<(&'static str, Load, Duration)>>>;

/// Generator feeding a queue, which feeds a server whose loads depart as soon as they are ready.
struct Line {
    sim: Simulation,
    root: SandboxId,
    generator: Generator,
    queue: Queue<Load>,
    server: Server<Load>,
    log: Log,
}

fn line(inter_arrival: Duration, service_hours: Vec<f64>, capacity: f64) -> desk::Result<Line> {
    let mut sim = Simulation::new();
    let root = sim.create_sandbox(0, Some("line"));
    let generator = Generator::new(
        &mut sim,
        GeneratorConfig {
            inter_arrival_time: Some(constant(inter_arrival)),
        },
        1,
        None,
    )?;
    let queue = Queue::new(&mut sim, f64::INFINITY, 2, None)?;
    let server = Server::new(
        &mut sim,
        ServerConfig {
            capacity,
            service_time: Some(load_sampler(
                SequenceDistribution::new(service_hours),
                TimeUnit::Hour,
            )),
        },
        3,
        None,
    )?;
    for child in [generator.sandbox(), queue.sandbox(), server.sandbox()].iter() {
        sim.add_child(root, *child)?;
    }
    let log = Log::default();
    {
        let queue = queue.clone();
        let log = Rc::clone(&log);
        generator.on_arrive(move |sim, load| {
            log.borrow_mut().push(("arrive", *load, sim.clock_time(root)));
            queue.request_enqueue(sim, *load)
        });
    }
    {
        let server = server.clone();
        queue.on_enqueued(move |sim, load| server.request_start(sim, *load));
    }
    {
        let queue = queue.clone();
        let log = Rc::clone(&log);
        server.on_started(move |sim, load| {
            log.borrow_mut().push(("start", *load, sim.clock_time(root)));
            queue.dequeue(sim, load).map(|_| ())
        });
    }
    {
        let handle = server.clone();
        let log = Rc::clone(&log);
        server.on_ready_to_depart(move |sim, load| {
            log.borrow_mut().push(("depart", *load, sim.clock_time(root)));
            handle.depart(sim, load).map(|_| ())
        });
    }
    Ok(Line {
        sim,
        root,
        generator,
        queue,
        server,
        log,
    })
}

#[test]
fn test_daily_generator() -> desk::Result<()> {
    let mut sim = Simulation::new();
    let generator = Generator::new(
        &mut sim,
        GeneratorConfig {
            inter_arrival_time: Some(constant(DAY)),
        },
        0,
        None,
    )?;
    let root = generator.sandbox();
    generator.start(&mut sim)?;
    sim.run_for(root, 5 * DAY + HOUR)?;
    assert_eq!(generator.count(), 5);
    assert_eq!(sim.head_event_time(root), Some(6 * DAY));
    Ok(())
}

#[test]
fn test_simultaneous_requests_are_served_back_to_back() -> desk::Result<()> {
    let mut sim = Simulation::new();
    let server = Server::new(
        &mut sim,
        ServerConfig {
            capacity: 1.0,
            service_time: Some(load_sampler(ConstantDistribution::new(3.0), TimeUnit::Hour)),
        },
        0,
        None,
    )?;
    let root = server.sandbox();
    let log = Log::default();
    {
        let log = Rc::clone(&log);
        server.on_started(move |sim, load| {
            log.borrow_mut().push(("start", *load, sim.clock_time(root)));
            Ok(())
        });
    }
    {
        let handle = server.clone();
        let log = Rc::clone(&log);
        server.on_ready_to_depart(move |sim, load| {
            log.borrow_mut().push(("depart", *load, sim.clock_time(root)));
            handle.depart(sim, load).map(|_| ())
        });
    }
    let first = sim.new_load();
    let second = sim.new_load();
    server.request_start(&mut sim, first)?;
    server.request_start(&mut sim, second)?;
    while sim.run(root)? {}
    assert_eq!(
        *log.borrow(),
        vec![
            ("start", first, Duration::default()),
            ("depart", first, 3 * HOUR),
            ("start", second, 3 * HOUR),
            ("depart", second, 6 * HOUR),
        ]
    );
    assert_eq!(server.occupancy(), 0);
    Ok(())
}

#[test]
fn test_line_waits_for_busy_server() -> desk::Result<()> {
    let Line {
        mut sim,
        root,
        generator,
        queue,
        server,
        log,
    } = line(HOUR, vec![1.5], 1.0)?;
    generator.start(&mut sim)?;
    sim.run_until(root, 4 * HOUR)?;
    generator.end(&mut sim);
    while sim.run(root)? {}
    let departures: Vec<_> = log
        .borrow()
        .iter()
        .filter(|(name, _, _)| *name == "depart")
        .map(|(_, load, time)| (*load, *time))
        .collect();
    assert_eq!(
        departures,
        vec![
            (Load::from(0), HOUR * 5 / 2),
            (Load::from(1), HOUR * 4),
            (Load::from(2), HOUR * 11 / 2),
            (Load::from(3), HOUR * 7),
        ]
    );
    assert_eq!(queue.occupancy(), 0);
    assert_eq!(server.occupancy(), 0);
    assert_eq!(sim.clock_time(root), HOUR * 7);
    assert!(approx_eq!(f64, server.util_serving(&sim), 6.0 / 7.0, epsilon = 1e-9));
    Ok(())
}

#[test]
fn test_warm_up_resets_statistics_but_not_occupancy() -> desk::Result<()> {
    let Line {
        mut sim,
        root,
        generator,
        queue,
        server,
        ..
    } = line(HOUR, vec![100.0], 1.0)?;
    generator.start(&mut sim)?;
    sim.warm_up_until(root, 10 * HOUR + HOUR / 2)?;
    assert_eq!(generator.count(), 0);
    assert_eq!(queue.occupancy(), 9);
    assert_eq!(server.occupancy(), 1);
    assert!(approx_eq!(f64, queue.avg_n_queueing(&sim), 9.0, epsilon = 1e-9));
    sim.run_for(root, HOUR)?;
    assert_eq!(generator.count(), 1);
    assert_eq!(queue.occupancy(), 10);
    assert!(approx_eq!(f64, queue.avg_n_queueing(&sim), 9.5, epsilon = 1e-9));
    assert!(approx_eq!(f64, server.util_serving(&sim), 1.0, epsilon = 1e-9));
    Ok(())
}

#[test]
fn test_line_runs_again_after_reset() -> desk::Result<()> {
    let Line {
        mut sim,
        root,
        generator,
        queue,
        server,
        log,
    } = line(HOUR, vec![1.5], 1.0)?;
    generator.start(&mut sim)?;
    sim.run_until(root, 4 * HOUR + HOUR / 2)?;
    let first_run: Vec<_> = log.borrow().iter().map(|(name, _, time)| (*name, *time)).collect();

    sim.reset(root);
    assert!(!generator.is_on());
    assert_eq!(queue.occupancy(), 0);
    assert_eq!(server.occupancy(), 0);
    log.borrow_mut().clear();

    generator.start(&mut sim)?;
    sim.run_until(root, 4 * HOUR + HOUR / 2)?;
    let second_run: Vec<_> = log.borrow().iter().map(|(name, _, time)| (*name, *time)).collect();
    assert_eq!(first_run, second_run);
    assert_eq!(generator.count(), 4);
    assert_eq!(server.serving().len(), 1);
    Ok(())
}

#[test]
fn test_same_seeds_replay_identically() -> desk::Result<()> {
    let replay = || -> desk::Result<Vec<Duration>> {
        let mut sim = Simulation::new();
        let generator = Generator::new(
            &mut sim,
            GeneratorConfig {
                inter_arrival_time: Some(desk::distribution::sampler(
                    rand_distr::Exp::new(1.0).unwrap(),
                    TimeUnit::Hour,
                )),
            },
            42,
            None,
        )?;
        let times = Rc::new(RefCell::new(Vec::new()));
        let sandbox = generator.sandbox();
        {
            let times = Rc::clone(&times);
            generator.on_arrive(move |sim, _| {
                times.borrow_mut().push(sim.clock_time(sandbox));
                Ok(())
            });
        }
        generator.start(&mut sim)?;
        sim.run_event_count(sandbox, 20)?;
        let times = times.borrow().clone();
        Ok(times)
    };
    let first = replay()?;
    assert_eq!(first.len(), 20);
    assert_eq!(first, replay()?);
    Ok(())
}
