use super::*;
use assert_matches::assert_matches;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

trait Greeter: Send + Sync + std::fmt::Debug {
    fn greet(&self) -> String;
}

#[derive(Debug)]
struct English;

impl Greeter for English {
    fn greet(&self) -> String {
        "hello".to_string()
    }
}

#[derive(Debug)]
struct French;

impl Greeter for French {
    fn greet(&self) -> String {
        "bonjour".to_string()
    }
}

#[derive(Debug)]
struct Config {
    name: &'static str,
}

#[derive(Debug)]
struct Database {
    config: Arc<Config>,
}

impl Injectable for Database {
    fn create(container: &Container) -> anyhow::Result<Self> {
        Ok(Self {
            config: container.get::<Config>()?,
        })
    }
}

#[derive(Debug)]
struct Repository {
    db: Arc<Database>,
}

impl Injectable for Repository {
    fn create(container: &Container) -> anyhow::Result<Self> {
        Ok(Self {
            db: container.resolve::<Database>()?,
        })
    }
}

#[derive(Debug)]
struct Ping;

impl Injectable for Ping {
    fn create(container: &Container) -> anyhow::Result<Self> {
        container.resolve::<Pong>()?;
        Ok(Self)
    }
}

struct Pong;

impl Injectable for Pong {
    fn create(container: &Container) -> anyhow::Result<Self> {
        container.resolve::<Ping>()?;
        Ok(Self)
    }
}

#[derive(Debug)]
struct Tracked {
    label: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl Disposable for Tracked {
    fn dispose(&self) {
        self.log.lock().push(self.label);
    }
}

#[test]
fn test_register_and_get_trait_object() {
    let container = Container::new();
    container.register::<dyn Greeter>(Arc::new(English)).unwrap();

    let greeter = container.get::<dyn Greeter>().unwrap();
    assert_eq!(greeter.greet(), "hello");
    assert!(container.contains::<dyn Greeter>());
    assert!(!container.contains::<Config>());
}

#[test]
fn test_reregistration_replaces_instance() {
    let container = Container::new();
    container.register::<dyn Greeter>(Arc::new(English)).unwrap();
    container.register::<dyn Greeter>(Arc::new(French)).unwrap();

    assert_eq!(container.get::<dyn Greeter>().unwrap().greet(), "bonjour");
    assert_eq!(container.resolve_all::<dyn Greeter>().unwrap().len(), 1);
}

#[test]
fn test_keyed_registrations_are_distinct() {
    let container = Container::new();
    container.register_keyed::<dyn Greeter>("en", Arc::new(English)).unwrap();
    container.register_keyed::<dyn Greeter>("fr", Arc::new(French)).unwrap();

    assert_eq!(container.get_keyed::<dyn Greeter>("fr").unwrap().greet(), "bonjour");
    assert_matches!(
        container.get::<dyn Greeter>(),
        Err(ContainerError::NotRegistered { key: None, .. })
    );
    assert_matches!(
        container.get_keyed::<dyn Greeter>("de"),
        Err(ContainerError::NotRegistered { key: Some(key), .. }) if key == "de"
    );

    let greetings: Vec<String> = container
        .resolve_all::<dyn Greeter>()
        .unwrap()
        .iter()
        .map(|greeter| greeter.greet())
        .collect();
    assert_eq!(greetings, vec!["hello", "bonjour"]);
}

#[test]
fn test_resolve_constructs_once_with_dependencies() {
    let container = Container::new();
    container.register(Arc::new(Config { name: "primary" })).unwrap();

    let first = container.resolve::<Repository>().unwrap();
    let second = container.resolve::<Repository>().unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let db = container.get::<Database>().unwrap();
    assert!(Arc::ptr_eq(&first.db, &db));
    assert_eq!(db.config.name, "primary");
}

#[test]
fn test_missing_dependency_surfaces_original_error() {
    let container = Container::new();
    assert_matches!(
        container.resolve::<Repository>(),
        Err(ContainerError::NotRegistered { type_name, .. }) if type_name.ends_with("Config")
    );
    // A failed construction leaves nothing cached.
    assert!(!container.contains::<Database>());
}

#[test]
fn test_circular_dependency_detected() {
    let container = Container::new();
    assert_matches!(
        container.resolve::<Ping>(),
        Err(ContainerError::CircularDependency(name)) if name.ends_with("Ping")
    );
    // The construction stack unwinds cleanly.
    container.register(Arc::new(Config { name: "later" })).unwrap();
    assert!(container.resolve::<Database>().is_ok());
}

#[test]
fn test_factory_runs_once() {
    let container = Container::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    container
        .register_factory::<dyn Greeter, _>(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(French) as Arc<dyn Greeter>)
        })
        .unwrap();

    let a = container.get::<dyn Greeter>().unwrap();
    let b = container.get::<dyn Greeter>().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_factory_error_is_construction_failure() {
    let container = Container::new();
    container
        .register_factory::<Config, _>(|_| Err(anyhow::anyhow!("no disk")))
        .unwrap();

    assert_matches!(
        container.get::<Config>(),
        Err(ContainerError::ConstructionFailed { message, .. }) if message == "no disk"
    );
}

#[test]
fn test_exports_are_lazy_and_filtered_by_metadata() {
    #[derive(Debug, PartialEq)]
    struct Tag(&'static str);

    let container = Container::new();
    let built = Arc::new(AtomicUsize::new(0));

    for (tag, english) in [("a", true), ("b", false)] {
        let built = built.clone();
        container
            .add_export::<dyn Greeter, Tag, _>("module", Tag(tag), move |_| {
                built.fetch_add(1, Ordering::SeqCst);
                let greeter: Arc<dyn Greeter> = if english {
                    Arc::new(English)
                } else {
                    Arc::new(French)
                };
                Ok(greeter)
            })
            .unwrap();
    }

    let exports = container.get_exports::<dyn Greeter, Tag>().unwrap();
    assert_eq!(exports.len(), 2);
    assert_eq!(exports[1].metadata(), &Tag("b"));
    assert_eq!(exports[0].origin(), "module");
    assert_eq!(built.load(Ordering::SeqCst), 0);

    let value = exports[1].value(&container).unwrap();
    assert_eq!(value.greet(), "bonjour");
    let again = exports[1].value(&container).unwrap();
    assert!(Arc::ptr_eq(&value, &again));
    assert_eq!(built.load(Ordering::SeqCst), 1);
    assert!(!exports[0].is_created());

    // Other metadata types see nothing.
    assert!(container.get_exports::<dyn Greeter, String>().unwrap().is_empty());
}

#[test]
fn test_resolve_all_includes_exports_after_registrations() {
    let container = Container::new();
    container
        .add_export::<dyn Greeter, (), _>("late", (), |_| {
            Ok(Arc::new(French) as Arc<dyn Greeter>)
        })
        .unwrap();
    container.register::<dyn Greeter>(Arc::new(English)).unwrap();

    let greetings: Vec<String> = container
        .resolve_all::<dyn Greeter>()
        .unwrap()
        .iter()
        .map(|greeter| greeter.greet())
        .collect();
    assert_eq!(greetings, vec!["hello", "bonjour"]);
}

#[test]
fn test_export_resolving_its_own_contract_is_a_cycle() {
    let container = Arc::new(Container::new());
    let attempts = Arc::new(AtomicUsize::new(0));

    let counter = attempts.clone();
    container
        .add_export::<dyn Greeter, (), _>("selfish", (), move |c| {
            counter.fetch_add(1, Ordering::SeqCst);
            c.resolve_all::<dyn Greeter>()?;
            Ok(Arc::new(English) as Arc<dyn Greeter>)
        })
        .unwrap();

    // On a worker so a re-entered cell fails the test instead of hanging it.
    let (done, outcome) = mpsc::channel();
    let worker = container.clone();
    thread::spawn(move || {
        let _ = done.send(worker.resolve_all::<dyn Greeter>().map(|all| all.len()));
    });
    let outcome = outcome
        .recv_timeout(Duration::from_secs(5))
        .expect("resolve_all never returned");
    assert_matches!(
        outcome,
        Err(ContainerError::CircularDependency(name)) if name.contains("Greeter")
    );
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    let exports = container.get_exports::<dyn Greeter, ()>().unwrap();
    assert!(!exports[0].is_created());
    assert_matches!(
        exports[0].value(&container),
        Err(ContainerError::CircularDependency(_))
    );
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    // The construction stack unwinds cleanly.
    container.register(Arc::new(Config { name: "later" })).unwrap();
    assert!(container.resolve::<Database>().is_ok());
}

#[test]
fn test_build_up_injects_into_external_object() {
    struct Screen {
        greeting: Mutex<Option<String>>,
    }

    impl Inject for Screen {
        fn inject(&self, container: &Container) -> anyhow::Result<()> {
            let greeter = container.get::<dyn Greeter>()?;
            *self.greeting.lock() = Some(greeter.greet());
            Ok(())
        }
    }

    let container = Container::new();
    let screen = Screen {
        greeting: Mutex::new(None),
    };
    assert_matches!(
        container.build_up(&screen),
        Err(ContainerError::NotRegistered { .. })
    );

    container.register::<dyn Greeter>(Arc::new(English)).unwrap();
    container.build_up(&screen).unwrap();
    assert_eq!(screen.greeting.lock().as_deref(), Some("hello"));
}

#[test]
fn test_dispose_reverse_order_once() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let container = Container::new();

    for label in ["first", "second", "third"] {
        let tracked = Arc::new(Tracked {
            label,
            log: log.clone(),
        });
        container.own(label, tracked).unwrap();
    }
    // Registered values are externally owned and never disposed.
    container
        .register(Arc::new(Tracked {
            label: "external",
            log: log.clone(),
        }))
        .unwrap();

    container.dispose();
    container.dispose();

    assert_eq!(*log.lock(), vec!["third", "second", "first"]);
    assert!(container.is_disposed());
    assert_matches!(container.get::<Tracked>(), Err(ContainerError::Disposed));
    assert_matches!(container.resolve::<Database>(), Err(ContainerError::Disposed));
    assert_matches!(
        container.register(Arc::new(Config { name: "late" })),
        Err(ContainerError::Disposed)
    );
}

#[test]
fn test_injectable_disposer_is_owned() {
    struct Cache {
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Injectable for Cache {
        fn create(container: &Container) -> anyhow::Result<Self> {
            Ok(Self {
                log: container.get::<Mutex<Vec<&'static str>>>()?,
            })
        }

        fn disposer(this: &Arc<Self>) -> Option<Arc<dyn Disposable>> {
            Some(this.clone())
        }
    }

    impl Disposable for Cache {
        fn dispose(&self) {
            self.log.lock().push("cache");
        }
    }

    let log = Arc::new(Mutex::new(Vec::<&'static str>::new()));
    let container = Container::new();
    container.register(log.clone()).unwrap();
    container.resolve::<Cache>().unwrap();
    container.resolve::<Cache>().unwrap();

    container.dispose();
    assert_eq!(*log.lock(), vec!["cache"]);
}

#[test]
fn test_panicking_disposer_does_not_block_others() {
    struct Explodes;

    impl Disposable for Explodes {
        fn dispose(&self) {
            panic!("dispose failure");
        }
    }

    let log = Arc::new(Mutex::new(Vec::new()));
    let container = Container::new();
    container
        .own(
            "tracked",
            Arc::new(Tracked {
                label: "tracked",
                log: log.clone(),
            }),
        )
        .unwrap();
    container.own("explodes", Arc::new(Explodes)).unwrap();

    container.dispose();
    assert_eq!(*log.lock(), vec!["tracked"]);
}
