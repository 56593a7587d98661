//! Manual smoke-test harness for `graphwire`, in the spirit of the
//! teacher's own `experiments` binary: not a benchmark suite, just a
//! place to run a few graphs by hand and watch the tracing output.

use graphwire::clone_via_round_trip;
use graphwire::object::{GraphObject, Link};
use graphwire::reader::ObjectReader;
use graphwire::registry::{Registry, Settings, VersionTolerance};
use graphwire::writer::ObjectWriter;
use graphwire::GraphValue;
use tracing_subscriber::EnvFilter;

#[derive(Debug, GraphValue)]
struct Employee {
	name: String,
	badge: i32,
	#[graphwire(transient, constructor_recreated)]
	login_count: i32,
	manager: Option<Link<Employee>>,
}

fn setup_tracing() {
	let _ = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).try_init();
}

fn main() {
	setup_tracing();

	let alice = Employee { name: "Alice".into(), badge: 1, login_count: 42, manager: None };
	let round_tripped = clone_via_round_trip(alice).expect("round trip");
	println!("round-tripped: {round_tripped:?}");
	assert_eq!(round_tripped.login_count, 0, "transient field resets across a clone");

	// A two-node cycle: bob reports to carol, carol reports to bob.
	let registry = Registry::new(Settings { version_tolerance: VersionTolerance::all(), ..Settings::default() });
	registry.register::<Employee>();

	let bob = graphwire::object::new_handle(Employee { name: "Bob".into(), badge: 2, login_count: 0, manager: None });
	let carol = graphwire::object::new_handle(Employee { name: "Carol".into(), badge: 3, login_count: 0, manager: None });
	bob.borrow_mut().as_any_mut().downcast_mut::<Employee>().unwrap().manager = Some(Link::from_handle(carol.clone()));
	carol.borrow_mut().as_any_mut().downcast_mut::<Employee>().unwrap().manager = Some(Link::from_handle(bob.clone()));

	let mut bytes = Vec::new();
	let mut writer = ObjectWriter::open(&mut bytes, registry.clone()).expect("open writer");
	writer.serialize(Some(bob)).expect("serialize cycle");
	writer.close().expect("close writer");

	let mut reader = ObjectReader::open(bytes.as_slice(), registry).expect("open reader");
	let read_back = reader.deserialize().expect("deserialize cycle").expect("non-null root");
	let read_back = read_back.borrow();
	let bob_again = read_back.as_any().downcast_ref::<Employee>().unwrap();
	let manager = bob_again.manager.as_ref().unwrap().borrow();
	let back_to_bob = manager.manager.as_ref().unwrap().borrow();
	println!("cycle closes: {}", back_to_bob.name == "Bob");
}
