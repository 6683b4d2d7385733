use std::thread;

use paging::{
    BackingStore, FaultError, MemoryDisk, SwapChain, SwapError, config::SwapConfig,
};
use pmm::{PAGE_SIZE, VirtualAddress};

fn arena(slots: usize) -> BackingStore<MemoryDisk> {
    BackingStore::new(MemoryDisk::new(slots as u64 * 8), SwapConfig::new(0, slots)).unwrap()
}

fn va(page: usize) -> VirtualAddress {
    VirtualAddress::new(page * PAGE_SIZE)
}

fn page(fill: u8) -> Box<[u8; PAGE_SIZE]> {
    Box::new([fill; PAGE_SIZE])
}

#[test]
fn capacity_is_shared_between_processes() {
    let swap = arena(4);
    let mut first = SwapChain::new();
    let mut second = SwapChain::new();

    for n in 0..3 {
        swap.store(&mut first, va(n), &page(n as u8)).unwrap();
    }
    swap.store(&mut second, va(0), &page(10)).unwrap();

    let err = swap.store(&mut second, va(1), &page(11)).unwrap_err();
    assert_eq!(err, SwapError::Exhausted);
    assert!(FaultError::from(err).is_capacity());
    let err = swap.store(&mut first, va(3), &page(3)).unwrap_err();
    assert_eq!(err, SwapError::Exhausted);

    // Rewriting a page a chain already holds needs no new slot.
    swap.store(&mut first, va(2), &page(22)).unwrap();
    let mut buf = page(0);
    swap.load(&first, va(2), &mut buf).unwrap();
    assert_eq!(buf[0], 22);
    assert_eq!(swap.chain_len(&first), 3);
}

#[test]
fn released_slots_go_to_other_processes() {
    let swap = arena(4);
    let mut first = SwapChain::new();
    let mut second = SwapChain::new();
    for n in 0..4 {
        swap.store(&mut first, va(n), &page(n as u8)).unwrap();
    }

    assert_eq!(swap.release_all(&mut first), 4);
    let mut buf = page(0);
    assert_eq!(swap.load(&first, va(1), &mut buf), Err(SwapError::NotFound));

    for n in 0..4 {
        swap.store(&mut second, va(n + 8), &page(0x80 + n as u8)).unwrap();
    }
    swap.load(&second, va(9), &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0x81));
}

#[test]
fn concurrent_stores_keep_chains_apart() {
    const THREADS: usize = 8;
    const PAGES: usize = 16;
    let swap = arena(THREADS * PAGES);

    let chains: Vec<SwapChain> = thread::scope(|scope| {
        let workers: Vec<_> = (0..THREADS)
            .map(|t| {
                let swap = &swap;
                scope.spawn(move || {
                    let mut chain = SwapChain::new();
                    for n in 0..PAGES {
                        let fill = (t * PAGES + n) as u8;
                        swap.store(&mut chain, va(n), &page(fill)).unwrap();
                    }
                    // Re-evicting the same pages must not take more slots.
                    for n in 0..PAGES {
                        let fill = (t * PAGES + n) as u8;
                        swap.store(&mut chain, va(n), &page(fill)).unwrap();
                    }
                    chain
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    assert_eq!(swap.free_slots(), 0);
    let mut buf = page(0);
    for (t, chain) in chains.iter().enumerate() {
        assert_eq!(swap.chain_len(chain), PAGES);
        for n in 0..PAGES {
            swap.load(chain, va(n), &mut buf).unwrap();
            assert!(buf.iter().all(|&b| b == (t * PAGES + n) as u8));
        }
    }

    let mut chains = chains;
    thread::scope(|scope| {
        for chain in chains.iter_mut() {
            let swap = &swap;
            scope.spawn(move || swap.release_all(chain));
        }
    });
    assert_eq!(swap.free_slots(), THREADS * PAGES);
}
