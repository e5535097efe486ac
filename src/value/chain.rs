use slab::Slab;

#[derive(Debug)]
struct Link<T> {
    elem: T,
    next: Option<usize>,
}

// A singly linked sequence whose links live in an arena.
// O(1) push/pop at the head, O(1) push at the tail.
#[derive(Debug)]
pub struct Chain<T> {
    links: Slab<Link<T>>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<T: Copy> Chain<T> {
    pub fn new() -> Self {
        Chain { links: Slab::new(), head: None, tail: None }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn first(&self) -> Option<T> {
        self.head.map(|k| self.links[k].elem)
    }

    pub fn push_head(&mut self, elem: T) {
        let key = self.links.insert(Link { elem, next: self.head });
        if self.tail.is_none() {
            self.tail = Some(key);
        }
        self.head = Some(key);
    }

    pub fn push_tail(&mut self, elem: T) {
        let key = self.links.insert(Link { elem, next: None });
        match self.tail {
            Some(t) => self.links[t].next = Some(key),
            None => self.head = Some(key)
        }
        self.tail = Some(key);
    }

    pub fn pop_head(&mut self) -> Option<T> {
        let key = self.head?;
        let link = self.links.remove(key);
        self.head = link.next;
        if self.head.is_none() {
            self.tail = None;
        }
        Some(link.elem)
    }

    // links elem in after `prev`, or at the head
    fn insert_after(&mut self, prev: Option<usize>, elem: T) {
        match prev {
            None => self.push_head(elem),
            Some(p) => {
                let next = self.links[p].next;
                let key = self.links.insert(Link { elem, next });
                self.links[p].next = Some(key);
                if self.tail == Some(p) {
                    self.tail = Some(key);
                }
            }
        }
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter { chain: self, at: self.head }
    }

    // elementwise transform, used for the weighted list sums
    pub fn map_in_place<F: FnMut(T) -> T>(&mut self, mut f: F) {
        let mut at = self.head;
        while let Some(k) = at {
            let link = &mut self.links[k];
            link.elem = f(link.elem);
            at = link.next;
        }
    }

    pub fn zip_in_place<F: FnMut(T, T) -> T>(&mut self, other: &Chain<T>, mut f: F) {
        let mut at = self.head;
        let mut theirs = other.iter();
        while let Some(k) = at {
            let link = &mut self.links[k];
            if let Some(o) = theirs.next() {
                link.elem = f(link.elem, o);
            }
            at = link.next;
        }
    }
}

impl<T: Copy + Ord> Chain<T> {
    // keeps the chain sorted, returns false for a duplicate
    pub fn insert_sorted(&mut self, elem: T) -> bool {
        let mut prev = None;
        let mut at = self.head;
        while let Some(k) = at {
            let e = self.links[k].elem;
            if e == elem {
                return false;
            }
            if e > elem {
                break;
            }
            prev = Some(k);
            at = self.links[k].next;
        }
        self.insert_after(prev, elem);
        true
    }
}

impl<T: Copy> Default for Chain<T> {
    fn default() -> Self {
        Chain::new()
    }
}

// copies compact the arena
impl<T: Copy> Clone for Chain<T> {
    fn clone(&self) -> Self {
        let mut c = Chain { links: Slab::with_capacity(self.len()), head: None, tail: None };
        for e in self.iter() {
            c.push_tail(e);
        }
        c
    }
}

impl<T: Copy + PartialEq> PartialEq for Chain<T> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl<T: Copy> FromIterator<T> for Chain<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut c = Chain::new();
        for e in iter {
            c.push_tail(e);
        }
        c
    }
}

pub struct Iter<'c, T> {
    chain: &'c Chain<T>,
    at: Option<usize>,
}

impl<'c, T: Copy> Iterator for Iter<'c, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let link = &self.chain.links[self.at?];
        self.at = link.next;
        Some(link.elem)
    }
}
